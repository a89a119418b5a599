//! Callflow: multi-agent turn execution for voice call flows.
//!
//! A call flow is a set of agents, each owning one step of a phone
//! conversation. Every external input runs the current agent against the
//! conversation history; the agent either answers with free text or settles
//! on a structured decision, which the orchestrator turns into a handoff to
//! another agent, the ending message, or a hangup.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use callflow::apps::car_loan::{self, CarLoanCall};
//! use callflow::backend::OpenAiBackend;
//!
//! # async fn example() -> callflow::error::Result<()> {
//! let backend = Arc::new(OpenAiBackend::from_env()?);
//! let call = CarLoanCall::new("李老三", "15001395923");
//! let mut session = car_loan::session(backend, &call)?;
//!
//! let outcome = session.chat("喂，哪位？").await?;
//! println!("{}", outcome.output_text);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod apps;
pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod tools;
pub mod types;
pub mod util;
