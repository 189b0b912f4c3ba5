//! 基础设施层：持有稀缺资源，只暴露能力

pub mod http_session;

pub use http_session::{HttpSession, RawResponse};
