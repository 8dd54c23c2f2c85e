/*!
The CIP-95 message bridge.

Some Cardano wallets (and wallet-hosting pages) answer requests posted on the
page message bus rather than through `window.cardano`. A request is
broadcast as `{ type, id, data }` and the answer comes back as
`{ id, type, data?, error? }` with the same `id`. Since the page also
receives its own posts, the request itself is echoed back to us and is
ignored.

No answer within the bridge timeout is not an error: the wallet simply does
not speak the bridge protocol and the caller falls back to CIP-30.
*/

use super::{RawApi, enable_error, first_address};
use crate::{
    address::RawAddress,
    error::EnableError,
    host::{MessageChannel, Runtime, with_timeout},
    network::{Network, NetworkId},
};
use futures::channel::oneshot;
use serde_json::{Value, json};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};
use tracing::debug;

pub const DISCOVERY_REQUEST: &str = "CARDANO_WALLET_DISCOVERY";
pub const CONNECT_REQUEST: &str = "CARDANO_WALLET_CONNECT";

/// members a connect response must carry
pub const REQUIRED_MEMBERS: [&str; 2] = ["networkId", "changeAddress"];

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct BridgeResponse {
    pub id: Value,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// A wallet announced by a [`DISCOVERY_REQUEST`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeWallet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

pub struct Cip95Bridge {
    channel: Rc<dyn MessageChannel>,
    runtime: Rc<dyn Runtime>,
    timeout: Duration,
    next_id: Cell<u64>,
}

impl Cip95Bridge {
    pub fn new(channel: Rc<dyn MessageChannel>, runtime: Rc<dyn Runtime>, timeout: Duration) -> Self {
        Self {
            channel,
            runtime,
            timeout,
            next_id: Cell::new(0),
        }
    }

    /// post a request and wait for the matching response, `None` if none
    /// came within the timeout
    pub async fn request(&self, kind: &str, data: Value) -> Option<BridgeResponse> {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let id = json!(format!("wallet-connector-{id}"));
        let request = json!({ "type": kind, "id": id, "data": data });

        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let echo = request.clone();
        let guard = self.channel.subscribe(Rc::new(move |message: Value| {
            if message == echo || message.get("id") != echo.get("id") {
                return;
            }
            match serde_json::from_value::<BridgeResponse>(message) {
                Ok(response) => {
                    if let Some(sender) = sender.borrow_mut().take() {
                        let _ = sender.send(response);
                    }
                }
                Err(error) => debug!(%error, "ignoring malformed bridge response"),
            }
        }));

        self.channel.post(request);
        let response = with_timeout(&*self.runtime, self.timeout, receiver).await;
        guard.detach();

        match response {
            Some(Ok(response)) => Some(response),
            Some(Err(oneshot::Canceled)) => None,
            None => {
                debug!(request = kind, "no answer from the wallet bridge");
                None
            }
        }
    }

    /// the wallets reachable through the bridge, empty if there is no bridge
    pub async fn discover(&self) -> Vec<BridgeWallet> {
        let Some(response) = self.request(DISCOVERY_REQUEST, Value::Null).await else {
            return Vec::new();
        };
        if let Some(error) = response.error {
            debug!(%error, "wallet bridge discovery failed");
            return Vec::new();
        }

        match serde_json::from_value(response.data.unwrap_or(Value::Null)) {
            Ok(wallets) => wallets,
            Err(error) => {
                debug!(%error, "ignoring malformed wallet bridge announcement");
                Vec::new()
            }
        }
    }
}

/// Connects one Cardano wallet through the [`Cip95Bridge`].
pub struct Cip95Adapter {
    wallet_id: String,
    bridge: Rc<Cip95Bridge>,
}

impl Cip95Adapter {
    pub fn new(wallet_id: &str, bridge: Rc<Cip95Bridge>) -> Self {
        Self {
            wallet_id: wallet_id.to_owned(),
            bridge,
        }
    }

    /// `Ok(None)` when the bridge did not answer
    pub async fn enable(&self) -> Result<Option<BridgeApi>, EnableError> {
        let Some(response) = self
            .bridge
            .request(CONNECT_REQUEST, json!({ "walletId": self.wallet_id }))
            .await
        else {
            return Ok(None);
        };

        if let Some(error) = response.error {
            return Err(match enable_error(error) {
                EnableError::Internal(reason) => EnableError::Rejected(reason),
                other => other,
            });
        }

        Ok(Some(BridgeApi {
            data: response.data.unwrap_or(Value::Null),
        }))
    }
}

/// The `data` of a successful connect response.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeApi {
    data: Value,
}

#[async_trait::async_trait(?Send)]
impl RawApi for BridgeApi {
    fn missing_methods(&self) -> Vec<String> {
        REQUIRED_MEMBERS
            .iter()
            .filter(|member| self.data.get(member).is_none_or(Value::is_null))
            .map(|member| (*member).to_owned())
            .collect()
    }

    async fn network(&self) -> Result<Network, EnableError> {
        self.data
            .get("networkId")
            .and_then(Value::as_u64)
            .and_then(|id| u8::try_from(id).ok())
            .map(|id| Network::Cardano(NetworkId::from(id)))
            .ok_or_else(|| EnableError::Internal("invalid networkId".to_owned()))
    }

    async fn raw_address(&self) -> Result<RawAddress, EnableError> {
        let listed = ["usedAddresses", "unusedAddresses"]
            .iter()
            .find_map(|member| first_address(self.data.get(member)?));
        let change = || {
            self.data
                .get("changeAddress")
                .and_then(Value::as_str)
                .filter(|address| !address.is_empty())
                .map(str::to_owned)
        };

        listed
            .or_else(change)
            .map(RawAddress::cardano)
            .ok_or_else(|| EnableError::Internal("the wallet returned no address".to_owned()))
    }
}
