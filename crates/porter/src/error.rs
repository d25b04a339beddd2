use porter_auth::auth::IntrospectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("introspection client error: {0}")]
    Introspection(#[from] IntrospectionError),

    #[error("backend client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
