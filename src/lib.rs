//! # Health RAG
//!
//! A retrieval-augmented healthcare assistant.
//!
//! Health RAG chunks and embeds a healthcare knowledge base into a vector
//! store, then answers questions by retrieving the closest passages and
//! asking a chat model to answer from them. A fixed-order multi-agent
//! workflow and a web chat UI sit on top of the same pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Corpus    │──▶│ Chunk+Embed │──▶│ Vector store │
//! │ builtin/dir │   │             │   │ qdrant/azure │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                    ┌───────────────────────┤
//!                    ▼                       ▼
//!              ┌───────────┐          ┌────────────┐
//!              │ RagEngine │◀─────────│   Agents   │
//!              └─────┬─────┘          └─────┬──────┘
//!                    ├──────────────────────┤
//!                    ▼                      ▼
//!              ┌──────────┐          ┌──────────┐
//!              │   CLI    │          │   HTTP   │
//!              │  (hrag)  │          │ chat UI  │
//!              └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hrag status                    # check Ollama and Qdrant
//! hrag ingest                    # index the built-in documents
//! hrag ask "What is hypertension?"
//! hrag agents run "How can I improve my sleep?"
//! hrag serve                     # chat UI on http://127.0.0.1:7860
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`corpus`] | Built-in documents and directory scanning |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction and streaming |
//! | [`vector_store`] | Vector store abstraction (Qdrant, Azure AI Search, memory) |
//! | [`rag`] | Retrieve → prompt → generate pipeline |
//! | [`agents`] | Multi-agent workflow |
//! | [`server`] | Web chat server |

pub mod agents;
pub mod ask;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod search;
pub mod server;
pub mod status;
pub mod vector_store;
