//! # CSR Forge
//!
//! A local-first drafting and quality-control pipeline for clinical study
//! reports.
//!
//! CSR Forge keeps the source shelf for a clinical study (protocol, SAP,
//! TLF outputs, prior reports), indexes uploaded files into a retrieval
//! corpus, and drafts report sections from that corpus through templates or
//! an AI provider. Every draft is an immutable section version with recorded
//! provenance, and a QC rule engine audits the assembled report for gaps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Source docs  │──▶│  Pipeline   │──▶│  SQLite  │
//! │ PDF/DOCX/TXT │   │ Clean+Chunk │   │  chunks  │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                ┌──────────┐        ┌──────────┐
//!                │ Template │        │ Provider │
//!                │  render  │        │ generate │
//!                └────┬─────┘        └────┬─────┘
//!                     └────────┬──────────┘
//!                              ▼
//!                    ┌──────────────────┐
//!                    │ Section versions │
//!                    │     + QC scan    │
//!                    └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! csr init                                      # create database
//! csr study add --code AB-101 --title "..."     # register a study
//! csr upload protocol.pdf --study AB-101 --doc-type protocol
//! csr generate --study AB-101 --section SYNOPSIS
//! csr qc run --study AB-101
//! csr show --study AB-101 --section SYNOPSIS
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`study`] | Study registry |
//! | [`documents`] | Source document shelf |
//! | [`extract`] | Text extraction (PDF, DOCX, plain text) |
//! | [`chunker`] | Text cleaning and chunking |
//! | [`ingest`] | Indexing pipeline |
//! | [`retrieval`] | Chunk store queries |
//! | [`structure`] | Report structure and section seeding |
//! | [`versions`] | Append-only section version history |
//! | [`context`] | Retrieval-backed context assembly |
//! | [`template`] | Template registry and rendering |
//! | [`provider`] | Generation provider client |
//! | [`generate`] | AI section drafting |
//! | [`qc`] | Quality-control rule engine |
//! | [`stats`] | Corpus statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod context;
pub mod db;
pub mod documents;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod qc;
pub mod retrieval;
pub mod stats;
pub mod structure;
pub mod study;
pub mod template;
pub mod versions;
