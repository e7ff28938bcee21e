//! Delivery core: staging, credential locking, destination resolution,
//! dispatch and retry. Nothing here knows about HTTP or the concrete
//! Telegram client; the platform is reached through [`Connector`].

pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod stager;

pub use credential::{Credential, Fingerprint};
pub use dispatcher::{Dispatcher, OutgoingDocument};
pub use error::{PlatformError, RejectReason, RelayError};
pub use locks::SessionLocks;
pub use pipeline::{Relay, RelayConfig};
pub use request::{Button, ButtonSpec, DeliveryReceipt, DeliveryRequest, RequestDraft};
pub use resolver::{ResolvedAddress, Strategy};
pub use retry::RetryPolicy;
pub use session::{Address, Connector, PeerHandle, PeerKind, PlatformSession};
pub use stager::{StagedPayload, Stager};
