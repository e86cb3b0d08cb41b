pub mod chat_api_ai_lib;
pub mod conversation;
pub mod describer;
pub mod gemini;
pub mod intents;
pub mod pipeline;
pub mod prompts;
pub mod renderer;
pub mod sessions;
pub mod settings;
