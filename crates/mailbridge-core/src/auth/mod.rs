//! Login, token refresh and request authentication.

pub mod flow;
pub mod refresh;
pub mod session;

pub use flow::{
    AuthorizationFlowOptions, BrowserLauncher, FlowError, FlowStage, SystemBrowser,
    perform_authorization_flow,
};
pub use refresh::{
    CoordinatorRegistry, RefreshCoordinator, RefreshSettings, TokenError, TokenErrorKind,
};
pub use session::SessionAuth;
