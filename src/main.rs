//! # CSR Forge CLI (`csr`)
//!
//! The `csr` binary is the primary interface for CSR Forge. It provides
//! commands for database initialization, study registration, source document
//! management, section drafting (template and AI), versioning, and QC.
//!
//! ## Usage
//!
//! ```bash
//! csr --config ./csr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csr init` | Create the SQLite database and run schema migrations |
//! | `csr study add` | Register a clinical study |
//! | `csr upload <file>` | Register a source document and index it into chunks |
//! | `csr sources` | List a study's source documents |
//! | `csr sections` | List the report sections for a study |
//! | `csr render` | Draft a section from a registered template |
//! | `csr generate` | Draft a section via the configured AI provider |
//! | `csr edit` | Append a human-authored section version |
//! | `csr show` | Print a section's latest version |
//! | `csr qc run` | Audit a study's report against the QC rules |
//! | `csr stats` | Print database statistics |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! csr init --config ./csr.toml
//!
//! # Register a study and upload its protocol
//! csr study add --code AB-101 --title "A Phase 2 Study of Abralizumab"
//! csr upload protocol.pdf --study AB-101 --doc-type protocol
//!
//! # Draft the synopsis from the indexed sources
//! csr generate --study AB-101 --section SYNOPSIS
//!
//! # Review the draft and audit the report
//! csr show --study AB-101 --section SYNOPSIS
//! csr qc run --study AB-101
//! ```

mod chunker;
mod config;
mod context;
mod db;
mod documents;
mod error;
mod extract;
mod generate;
mod ingest;
mod migrate;
mod models;
mod provider;
mod qc;
mod retrieval;
mod stats;
mod structure;
mod study;
mod template;
mod versions;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CSR Forge CLI: a local-first drafting and quality-control pipeline for
/// clinical study reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "csr",
    about = "CSR Forge: a local-first drafting and quality-control pipeline for clinical study reports",
    version,
    long_about = "CSR Forge manages the source document shelf for a clinical study (protocol, SAP, \
    TLF outputs, prior reports), indexes uploaded files into a retrieval corpus, and drafts report \
    sections from that corpus through templates or an AI provider, with versioning and QC auditing."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./csr.toml`. Database, storage, chunking, retrieval,
    /// and generation settings are read from this file.
    #[arg(long, global = true, default_value = "csr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, all required tables, and the
    /// file storage root. This command is idempotent; running it multiple
    /// times is safe.
    Init,

    /// Manage clinical studies.
    Study {
        #[command(subcommand)]
        action: StudyAction,
    },

    /// Register a source document and index it into the retrieval corpus.
    ///
    /// Copies the file into managed storage, records its metadata and
    /// content hash, makes it the current document for its
    /// (type, language) slot, and extracts and chunks its text unless
    /// `--no-index` is given.
    Upload {
        /// Path to the source file (PDF, DOCX, TXT, or MD).
        file: PathBuf,

        /// Study code or id the document belongs to.
        #[arg(long)]
        study: String,

        /// Document type: `protocol`, `sap`, `tlf`, or `csr_prev`.
        #[arg(long)]
        doc_type: String,

        /// Document language tag.
        #[arg(long, default_value = "en")]
        language: String,

        /// Version label, e.g. `v2.0` or `final`.
        #[arg(long)]
        label: Option<String>,

        /// Uploader identity recorded on the document.
        #[arg(long)]
        by: Option<String>,

        /// Register the document without indexing it.
        #[arg(long)]
        no_index: bool,
    },

    /// List a study's source documents.
    Sources {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Include archived documents.
        #[arg(long)]
        all: bool,
    },

    /// Re-run extraction and chunking for indexed documents.
    ///
    /// A failed run leaves the previous chunk set intact and marks the
    /// document's index status as `error`.
    Reingest {
        /// Document id to reingest.
        #[arg(long)]
        doc: Option<String>,

        /// Reingest every index-enabled document of a study.
        #[arg(long)]
        study: Option<String>,
    },

    /// Archive a source document.
    ///
    /// Removes its chunks from the retrieval corpus and clears its
    /// current-document flag. The stored file and metadata are kept.
    Archive {
        /// Document id.
        #[arg(long)]
        doc: String,
    },

    /// Restore an archived source document.
    ///
    /// Reactivates the document and, if its (type, language) slot is free,
    /// makes it current again. Chunks are not rebuilt; run `reingest` to
    /// re-index.
    Restore {
        /// Document id.
        #[arg(long)]
        doc: String,
    },

    /// Inspect the retrieval corpus.
    ///
    /// Lists chunks for a study with optional filters and pagination.
    Chunks {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Filter by source document type (e.g. `protocol`).
        #[arg(long)]
        source_type: Option<String>,

        /// Only chunks whose text contains this substring.
        #[arg(long)]
        query: Option<String>,

        /// Maximum number of chunks to print.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Number of chunks to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// List the report sections for a study.
    ///
    /// Creates the report structure with the standard section set on first
    /// use.
    Sections {
        /// Study code or id.
        #[arg(long)]
        study: String,
    },

    /// Print a section's latest version.
    Show {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Section code (e.g. `SYNOPSIS`).
        #[arg(long)]
        section: String,

        /// Print the version history instead of the latest text.
        #[arg(long)]
        history: bool,
    },

    /// Append a human-authored section version.
    Edit {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Section code (e.g. `SYNOPSIS`).
        #[arg(long)]
        section: String,

        /// The new section text.
        #[arg(long)]
        text: Option<String>,

        /// Read the new section text from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Author identity recorded on the version.
        #[arg(long)]
        by: Option<String>,
    },

    /// Draft a section by rendering its template.
    ///
    /// Resolves the best-matching section template (study scope, then
    /// sponsor, then global), fills its placeholders from the retrieval
    /// context, and appends the result as a new version. Unfilled
    /// placeholders are reported.
    Render {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Section code (e.g. `SYNOPSIS`).
        #[arg(long)]
        section: String,

        /// Extra context variables as `key=value` pairs.
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// Author identity recorded on the version.
        #[arg(long)]
        by: Option<String>,
    },

    /// Draft a section via the configured AI provider.
    ///
    /// Assembles the retrieval context, builds the prompt, calls the
    /// provider (or the built-in stub), and appends the result as a new
    /// version. Every attempt is recorded in the generation log.
    Generate {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Section code (e.g. `SYNOPSIS`).
        #[arg(long)]
        section: String,

        /// Override the configured token limit.
        #[arg(long)]
        max_tokens: Option<i64>,

        /// Override the configured sampling temperature.
        #[arg(long)]
        temperature: Option<f64>,

        /// Extra context variables as `key=value` pairs.
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// Author identity recorded on the version.
        #[arg(long)]
        by: Option<String>,
    },

    /// Run quality-control checks and manage findings.
    Qc {
        #[command(subcommand)]
        action: QcAction,
    },

    /// Manage section and prompt templates.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Print the generation audit log for a study.
    Log {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Only entries for this section code.
        #[arg(long)]
        section: Option<String>,

        /// Maximum number of entries to print.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Print database statistics.
    Stats,
}

/// Study management subcommands.
#[derive(Subcommand)]
enum StudyAction {
    /// Register a new clinical study.
    Add {
        /// Unique study code, e.g. `AB-101`.
        #[arg(long)]
        code: String,

        /// Full study title.
        #[arg(long)]
        title: String,

        /// Trial phase, e.g. `2` or `3b`.
        #[arg(long)]
        phase: Option<String>,

        /// Indication under study.
        #[arg(long)]
        indication: Option<String>,

        /// Sponsor name, used for sponsor-scoped template resolution.
        #[arg(long)]
        sponsor: Option<String>,
    },

    /// List all registered studies.
    List,
}

/// Quality-control subcommands.
#[derive(Subcommand)]
enum QcAction {
    /// Audit a study's report and record the findings as open issues.
    ///
    /// Checks every section's latest version for missing or too-short
    /// content and leftover placeholders, and the report as a whole for
    /// missing required sections. Each run appends a fresh set of issues.
    Run {
        /// Study code or id.
        #[arg(long)]
        study: String,
    },

    /// List recorded QC issues.
    Issues {
        /// Study code or id.
        #[arg(long)]
        study: String,

        /// Filter by status: `open` or `resolved`.
        #[arg(long)]
        status: Option<String>,

        /// Filter by severity: `error` or `warning`.
        #[arg(long)]
        severity: Option<String>,
    },

    /// Mark a QC issue as resolved.
    Resolve {
        /// Issue id.
        id: String,

        /// Reviewer identity recorded on the issue.
        #[arg(long)]
        by: Option<String>,
    },
}

/// Template management subcommands.
#[derive(Subcommand)]
enum TemplateAction {
    /// Register a new template (or a new version of an existing one).
    ///
    /// Placeholders use `{{name}}` syntax and are filled from the
    /// retrieval context at render time.
    Add {
        /// Template name.
        #[arg(long)]
        name: String,

        /// Template kind: `section` (rendered into a version) or `prompt`
        /// (drives AI generation).
        #[arg(long)]
        kind: String,

        /// Section code the template applies to (e.g. `SYNOPSIS`).
        #[arg(long)]
        section: String,

        /// Template language tag.
        #[arg(long, default_value = "en")]
        language: String,

        /// Resolution scope: `global`, `sponsor`, or `study`.
        #[arg(long, default_value = "global")]
        scope: String,

        /// Sponsor name (required when scope is `sponsor`).
        #[arg(long)]
        sponsor: Option<String>,

        /// Study code or id (required when scope is `study`).
        #[arg(long)]
        study: Option<String>,

        /// Inline template content.
        #[arg(long)]
        content: Option<String>,

        /// Read the template content from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Prefer this template over others at the same scope.
        #[arg(long = "default")]
        default: bool,
    },

    /// List registered templates.
    List {
        /// Only templates for this section code.
        #[arg(long)]
        section: Option<String>,
    },
}

/// Parse a `key=value` pair for `--var` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.root)?;
            println!("Database initialized successfully.");
        }
        Commands::Study { action } => match action {
            StudyAction::Add {
                code,
                title,
                phase,
                indication,
                sponsor,
            } => {
                study::run_study_add(&cfg, &code, &title, phase, indication, sponsor).await?;
            }
            StudyAction::List => {
                study::run_study_list(&cfg).await?;
            }
        },
        Commands::Upload {
            file,
            study,
            doc_type,
            language,
            label,
            by,
            no_index,
        } => {
            documents::run_upload(&cfg, &study, &file, &doc_type, &language, label, by, no_index)
                .await?;
        }
        Commands::Sources { study, all } => {
            documents::run_sources(&cfg, &study, all).await?;
        }
        Commands::Reingest { doc, study } => match (doc, study) {
            (Some(id), None) => ingest::run_reingest(&cfg, &id).await?,
            (None, Some(key)) => ingest::run_reingest_study(&cfg, &key).await?,
            _ => anyhow::bail!("provide exactly one of --doc or --study"),
        },
        Commands::Archive { doc } => {
            documents::run_archive(&cfg, &doc).await?;
        }
        Commands::Restore { doc } => {
            documents::run_restore(&cfg, &doc).await?;
        }
        Commands::Chunks {
            study,
            source_type,
            query,
            limit,
            offset,
        } => {
            retrieval::run_chunks(&cfg, &study, source_type, query, limit, offset).await?;
        }
        Commands::Sections { study } => {
            structure::run_sections(&cfg, &study).await?;
        }
        Commands::Show {
            study,
            section,
            history,
        } => {
            versions::run_show(&cfg, &study, &section, history).await?;
        }
        Commands::Edit {
            study,
            section,
            text,
            file,
            by,
        } => {
            versions::run_edit(&cfg, &study, &section, text, file, by).await?;
        }
        Commands::Render {
            study,
            section,
            vars,
            by,
        } => {
            template::run_render(&cfg, &study, &section, vars, by).await?;
        }
        Commands::Generate {
            study,
            section,
            max_tokens,
            temperature,
            vars,
            by,
        } => {
            generate::run_generate(&cfg, &study, &section, max_tokens, temperature, vars, by)
                .await?;
        }
        Commands::Qc { action } => match action {
            QcAction::Run { study } => {
                qc::run_qc_run(&cfg, &study).await?;
            }
            QcAction::Issues {
                study,
                status,
                severity,
            } => {
                qc::run_qc_issues(&cfg, &study, status, severity).await?;
            }
            QcAction::Resolve { id, by } => {
                qc::run_qc_resolve(&cfg, &id, by).await?;
            }
        },
        Commands::Template { action } => match action {
            TemplateAction::Add {
                name,
                kind,
                section,
                language,
                scope,
                sponsor,
                study,
                content,
                file,
                default,
            } => {
                template::run_template_add(
                    &cfg, &name, &kind, &section, &language, &scope, sponsor, study, content,
                    file, default,
                )
                .await?;
            }
            TemplateAction::List { section } => {
                template::run_template_list(&cfg, section).await?;
            }
        },
        Commands::Log {
            study,
            section,
            limit,
        } => {
            generate::run_log(&cfg, &study, section, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
