//! Admission policy configuration and resolution.

pub mod effective;
pub mod endpoint;
pub mod rules;

pub use effective::{risk_factor, EffectivePolicy, Resolution};
pub use endpoint::EndpointKey;
pub use rules::{EndpointPolicy, LimitPolicy, PolicySet};
