//! LLM side of content generation: the provider
//! contract, an OpenAI-compatible JSON-mode client and prompt templates.

pub mod openai;
pub mod provider;
pub mod template;

pub use openai::OpenAiProvider;
pub use provider::{complete_as, CompletionOptions, ContentProvider, Message, ProviderError, Role};
pub use template::{PromptTemplates, TemplateError, TemplateLoader};
