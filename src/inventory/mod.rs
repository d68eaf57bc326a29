pub mod k8s;
pub mod resolve;
pub mod types;

pub use resolve::resolve;
pub use types::{Action, Backend, Frontend, FrontendMap, Intercept, InterceptAction, PlainHttpPolicy};
