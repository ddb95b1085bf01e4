//! OAuth token lifecycle
//!
//! - [`Token`] and the [`TokenSource`] abstraction
//! - [`GoogleTokenEndpoint`] for refresh and code exchange
//! - [`RefreshingTokenSource`], single-flight refresh of an expired token
//! - [`PersistingTokenSource`], write-back of changed tokens through a
//!   [`TokenChangeHandler`]

mod endpoint;
mod persist;
mod refresh;
mod token;

pub use endpoint::{GMAIL_SCOPES, GoogleTokenEndpoint, TokenEndpoint};
pub use persist::{
    CredentialPersister, PersistingTokenSource, TokenChangeHandler, token_source_for_account,
};
pub use refresh::RefreshingTokenSource;
pub use token::{AuthError, StaticTokenSource, Token, TokenSource};
