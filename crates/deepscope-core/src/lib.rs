// Conversational analysis core
//
// The engine behind the reasoning gateway: it owns sessions and their
// lifecycle, reads source code safely, keeps untrusted input quarantined
// inside prompts, drives multi-turn dialogues against a remote reasoning
// service, and runs parallel hypothesis tournaments.
//
// Key pieces:
// - SecureReader: the only component touching the filesystem
// - sanitizer: prompt-safety primitives and safe prompt composition
// - SessionManager: owning map of sessions with per-session locking
// - DialogueAdapter: start / continue / finalize against a ChatClient
// - ConversationOrchestrator: the three public session operations
// - TournamentScheduler: bounded-parallel hypothesis tournaments

pub mod adapter;
pub mod chat;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod reader;
pub mod result;
pub mod sanitizer;
pub mod session;
pub mod session_manager;
pub mod tournament;

// Re-exports for consumers
pub use adapter::{DialogueAdapter, SummaryFormat};
pub use chat::{BoxedChat, ChatClient, ChatHandle, PrimingTurn, ScriptedChatClient};
pub use context::{
    AnalysisContext, AnalysisKind, CodeLocation, CodeScope, Finding, FindingKind, Severity,
};
pub use error::{classify, AnalysisError, ClassifiedError, ErrorCategory, Result};
pub use orchestrator::ConversationOrchestrator;
pub use reader::SecureReader;
pub use result::{AnalysisResult, AnalysisStatus, RecommendedAction, RootCause};
pub use session::{SessionStatus, Turn, TurnRole};
pub use session_manager::SessionManager;
pub use tournament::{TournamentConfig, TournamentResult, TournamentScheduler};
