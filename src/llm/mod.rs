//! LLM 层：推理网关（ReasoningGateway）与后端实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod reasoning;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use reasoning::ReasoningGateway;
pub use traits::{LlmClient, Message, Role};
