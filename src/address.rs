/*!
Normalization of the addresses wallets hand back.

CIP-30 wallets return addresses as hexadecimal strings of the raw address
bytes, some wrap them in a CBOR byte string first, a few already return
bech32. [`to_canonical`] accepts all of them and returns the bech32 (or
base58 for Byron) text form, checked by [`is_valid`].

EVM and Solana addresses go through [`normalize`] as well, so that every
connected session exposes an address validated for its chain family.
*/

use crate::{error::AddressDecodingError, network::ChainFamily};
use bech32::{Bech32, Hrp};
use pallas_codec::minicbor::{self, data::Type};
use sha3::{Digest as _, Keccak256};

pub const MIN_ADDRESS_LENGTH: usize = 58;
pub const MAX_ADDRESS_LENGTH: usize = 108;

/// `addr1`/`addr_test1` Shelley, `Ae2` and `2cWKMJemoBa` Byron mainnet and
/// testnet, `stake1`/`stake_test1` reward addresses
const KNOWN_PREFIXES: [&str; 6] = [
    "addr1",
    "addr_test1",
    "Ae2",
    "2cWKMJemoBa",
    "stake1",
    "stake_test1",
];

const CREDENTIAL_LENGTH: usize = 28;
const PAYMENT_END: usize = 1 + CREDENTIAL_LENGTH;
const STAKING_END: usize = PAYMENT_END + CREDENTIAL_LENGTH;

/// An address as returned by a protocol adapter, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawAddress {
    pub family: ChainFamily,
    pub value: String,
}

impl RawAddress {
    pub fn cardano(value: impl Into<String>) -> Self {
        Self {
            family: ChainFamily::Cardano,
            value: value.into(),
        }
    }

    pub fn evm(value: impl Into<String>) -> Self {
        Self {
            family: ChainFamily::Evm,
            value: value.into(),
        }
    }

    pub fn solana(value: impl Into<String>) -> Self {
        Self {
            family: ChainFamily::Solana,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Base,
    Enterprise,
    Pointer,
    Reward,
}

impl AddressType {
    /// from the high nibble of the header byte. The script variants share
    /// the prefix of their key hash sibling.
    fn from_header(header: u8) -> Option<Self> {
        match header >> 4 {
            0b0000..=0b0011 => Some(Self::Base),
            0b0100 | 0b0101 => Some(Self::Pointer),
            0b0110 | 0b0111 => Some(Self::Enterprise),
            0b1110 | 0b1111 => Some(Self::Reward),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AddressComponents<'a> {
    header: u8,
    network_id: u8,
    address_type: AddressType,
    payment_part: &'a [u8],
    staking_part: Option<&'a [u8]>,
}

impl<'a> AddressComponents<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, String> {
        let Some(&header) = bytes.first() else {
            return Err("empty address".to_owned());
        };
        let address_type = AddressType::from_header(header)
            .ok_or_else(|| format!("unsupported address header {header:#04x}"))?;
        if bytes.len() < PAYMENT_END {
            return Err(format!("address too short ({} bytes)", bytes.len()));
        }

        let payment_part = &bytes[1..PAYMENT_END];
        let staking_part =
            (bytes.len() > PAYMENT_END).then(|| &bytes[PAYMENT_END..bytes.len().min(STAKING_END)]);

        let components = Self {
            header,
            network_id: header & 0x0f,
            address_type,
            payment_part,
            staking_part,
        };

        match (address_type, staking_part) {
            (AddressType::Base, Some(staking)) if staking.len() == CREDENTIAL_LENGTH => {}
            (AddressType::Base, _) => return Err("base address without staking part".to_owned()),
            (AddressType::Pointer, Some(_)) => {}
            (AddressType::Pointer, None) => return Err("pointer address without pointer".to_owned()),
            (AddressType::Enterprise | AddressType::Reward, None) => {}
            (AddressType::Enterprise | AddressType::Reward, Some(_)) => {
                return Err(format!("unexpected trailing bytes in {address_type:?} address"));
            }
        }
        if bytes.len() > STAKING_END {
            return Err(format!("address too long ({} bytes)", bytes.len()));
        }

        Ok(components)
    }

    fn prefix(&self) -> &'static str {
        let mainnet = self.network_id == 1;
        match (self.address_type, mainnet) {
            (AddressType::Reward, true) => "stake",
            (AddressType::Reward, false) => "stake_test",
            (_, true) => "addr",
            (_, false) => "addr_test",
        }
    }

    fn to_bech32(&self) -> Result<String, String> {
        let hrp = Hrp::parse(self.prefix()).map_err(|error| error.to_string())?;

        let mut bytes = Vec::with_capacity(STAKING_END);
        bytes.push(self.header);
        bytes.extend_from_slice(self.payment_part);
        if let Some(staking) = self.staking_part {
            bytes.extend_from_slice(staking);
        }

        bech32::encode::<Bech32>(hrp, &bytes).map_err(|error| error.to_string())
    }
}

/// Is `address` one of the address text forms we expose?
///
/// Known prefix and a length between [`MIN_ADDRESS_LENGTH`] and
/// [`MAX_ADDRESS_LENGTH`] characters.
pub fn is_valid(address: &str) -> bool {
    (MIN_ADDRESS_LENGTH..=MAX_ADDRESS_LENGTH).contains(&address.len())
        && KNOWN_PREFIXES
            .iter()
            .any(|prefix| address.starts_with(prefix))
}

/// Convert a wallet-returned Cardano address to its canonical text form.
///
/// Already valid addresses are returned as is, which makes the function
/// idempotent. Otherwise the input is decoded from hexadecimal and we try,
/// in order, to unwrap a CBOR byte (or text) string, then to read the
/// bytes as a raw address.
///
/// ```
/// # use wallet_connector::address::to_canonical;
/// let address = to_canonical("619493315cd92eb5d8c4304e67b7e16ae36d61d34502694657811a2c8e").unwrap();
/// assert_eq!(address, "addr1vx2fxv2umyhttkxyxp8x0dlpdt3k6cwng5pxj3jhsydzers66hrl8");
/// ```
pub fn to_canonical(raw: &str) -> Result<String, AddressDecodingError> {
    let candidate = raw.trim();
    if is_valid(candidate) {
        return Ok(candidate.to_owned());
    }

    let hex = candidate.strip_prefix("0x").unwrap_or(candidate);
    let bytes = hex::decode(hex).map_err(|error| {
        AddressDecodingError::new(raw, format!("neither bech32 nor hexadecimal: {error}"))
    })?;

    if let Some(address) = unwrap_cbor(&bytes).filter(|address| is_valid(address)) {
        return Ok(address);
    }

    let address = from_bytes(&bytes).map_err(|reason| AddressDecodingError::new(raw, reason))?;
    if is_valid(&address) {
        Ok(address)
    } else {
        Err(AddressDecodingError::new(
            raw,
            format!("decoded `{address}' is not a valid address"),
        ))
    }
}

/// the inner value if `bytes` is exactly one CBOR byte string or text string
fn unwrap_cbor(bytes: &[u8]) -> Option<String> {
    let mut decoder = minicbor::Decoder::new(bytes);

    let address = match decoder.datatype().ok()? {
        Type::Bytes => from_bytes(decoder.bytes().ok()?).ok(),
        Type::String => {
            let text = decoder.str().ok()?;
            if is_valid(text) {
                Some(text.to_owned())
            } else {
                from_bytes(&hex::decode(text).ok()?).ok()
            }
        }
        _ => None,
    };

    if decoder.position() == bytes.len() {
        address
    } else {
        None
    }
}

fn from_bytes(bytes: &[u8]) -> Result<String, String> {
    match bytes.first() {
        Some(header) if header >> 4 == 0b1000 => byron_from_bytes(bytes),
        _ => AddressComponents::parse(bytes)?.to_bech32(),
    }
}

fn byron_from_bytes(bytes: &[u8]) -> Result<String, String> {
    match pallas_addresses::Address::from_bytes(bytes) {
        Ok(pallas_addresses::Address::Byron(address)) => Ok(address.to_base58()),
        Ok(_) => Err("not a Byron address".to_owned()),
        Err(error) => Err(format!("invalid Byron address: {error}")),
    }
}

/// EIP-55 mixed case checksum of a `0x` prefixed address
pub fn to_checksum_address(raw: &str) -> Result<String, AddressDecodingError> {
    let trimmed = raw.trim();
    let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    else {
        return Err(AddressDecodingError::new(raw, "missing 0x prefix"));
    };
    if hex.len() != 40 || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressDecodingError::new(raw, "expected 20 hexadecimal bytes"));
    }

    let lower = hex.to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());

    let mut address = String::with_capacity(42);
    address.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            address.push(c.to_ascii_uppercase());
        } else {
            address.push(c);
        }
    }

    Ok(address)
}

/// check a Solana public key is the base58 encoding of 32 bytes
pub fn to_solana_address(raw: &str) -> Result<String, AddressDecodingError> {
    let trimmed = raw.trim();
    let bytes = bs58::decode(trimmed)
        .into_vec()
        .map_err(|error| AddressDecodingError::new(raw, error.to_string()))?;
    if bytes.len() != 32 {
        return Err(AddressDecodingError::new(
            raw,
            format!("expected a 32 bytes public key, got {} bytes", bytes.len()),
        ));
    }
    Ok(bs58::encode(bytes).into_string())
}

/// Normalize an address for its chain family.
pub fn normalize(raw: &RawAddress) -> Result<String, AddressDecodingError> {
    match raw.family {
        ChainFamily::Cardano => to_canonical(&raw.value),
        ChainFamily::Evm => to_checksum_address(&raw.value),
        ChainFamily::Solana => to_solana_address(&raw.value),
    }
}

/// The validator behind the connected session invariant: `true` only for
/// addresses already in their canonical form.
pub fn is_valid_for(family: ChainFamily, address: &str) -> bool {
    match family {
        ChainFamily::Cardano => is_valid(address),
        ChainFamily::Evm => to_checksum_address(address).is_ok_and(|checksum| checksum == address),
        ChainFamily::Solana => to_solana_address(address).is_ok_and(|key| key == address),
    }
}
