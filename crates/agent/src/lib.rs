#![allow(
    clippy::multiple_inherent_impl,
    reason = "impl blocks split across files for organization"
)]

pub mod client;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod normalize;
pub mod profile;
pub mod types;

pub use client::AgentClient;
pub use error::AgentError;
pub use fallback::FallbackProvider;
pub use gateway::{AgentGateway, BrandConfigProvider};
pub use normalize::normalize_reply;
pub use profile::Scenario;
pub use types::{
    AgentReply, AgentRequest, ApiResponse, ChatResponse, FallbackInfo, InvokeRequest, MessagePart,
    ResponseMessage, SimpleMessage, ToolsSummary,
};
