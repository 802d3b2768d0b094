// Gemini chat client
//
// Implements the core ChatClient trait against the Gemini generateContent
// API. Each chat handle carries the full conversation history and replays
// it on every send, which is how the API models multi-turn chats.

mod client;

pub use client::GeminiChatClient;
