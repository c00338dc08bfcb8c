//! `ansybl`: the Ansybl protocol command-line interface.
//!
//! Subcommands for working with feed documents on the command line:
//!
//! - **`keygen`**: generate an Ed25519 key pair.
//! - **`validate`**: structural checks without full parsing.
//! - **`parse`**: full parse with optional signature verification.
//! - **`new`**: build and sign a feed from metadata and item files.
//! - **`canonicalize`**: print the signing payload of a feed or item.
//! - **`migrate`**: move a feed to another protocol version.
//! - **`roundtrip`**: check a migration path for data loss.
//!
//! All subcommands read JSON from a file path or from stdin (`-`). Exit codes:
//! 0 on success, 1 when the document fails, 2 on usage or I/O errors.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use ansybl::canonical::{canonicalize_value, CanonicalMode};
use ansybl::render::{render_document, render_report};
use ansybl::{
    create_complete_feed, validate_document, Author, Document, FeedMetadata, ItemData, KeyPair,
    MigrationOptions, MigrationRegistry, MigrationValidator, Migrator, ParseOptions, Parser as DocParser,
    ProtocolVersion, Report,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// ansybl: Ansybl protocol CLI
///
/// Generate, validate, parse and migrate Ansybl feed documents.
#[derive(Parser)]
#[command(name = "ansybl", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new Ed25519 key pair and print it as JSON.
    ///
    /// The private key is printed in the clear. Store it somewhere safe and
    /// pass it to `new` or `migrate --resign` through ANSYBL_PRIVATE_KEY.
    Keygen,

    /// Validate a feed document without constructing it.
    ///
    /// Exits 0 if the document has no errors (warnings are allowed), 1
    /// otherwise. Pass `-` as FILE to read from stdin.
    Validate {
        /// Path to a JSON file, or `-` for stdin.
        file: PathBuf,

        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Parse a feed document the way a consumer would.
    ///
    /// Prints the parsed feed to stdout and the report to stderr. Exits 1 when
    /// no feed could be produced.
    Parse {
        /// Path to a JSON file, or `-` for stdin.
        file: PathBuf,

        /// Verify the document signature and every item signature.
        #[arg(long)]
        verify: bool,

        /// Abort on any validation, construction or signature failure.
        #[arg(long)]
        strict: bool,

        /// Keep `_`-prefixed extension fields in the output.
        #[arg(long)]
        preserve_extensions: bool,

        /// Print the full parse result as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Build a signed feed and print it as JSON.
    ///
    /// METADATA is an object with title, home_page_url, feed_url and
    /// author.name (plus optional description, icon, language, version).
    /// ITEMS is an array of item objects; id and url are required and
    /// date_published defaults to now. The author's public key is derived
    /// from the private key.
    ///
    /// Example:
    ///   ANSYBL_PRIVATE_KEY=ed25519:... ansybl new --metadata feed.json --items posts.json
    New {
        /// Path to the feed metadata JSON file.
        #[arg(long, value_name = "FILE")]
        metadata: PathBuf,

        /// Path to a JSON array of items, or `-` for stdin.
        #[arg(long, value_name = "FILE")]
        items: PathBuf,

        /// Private key, `ed25519:<base64>`.
        #[arg(long, env = "ANSYBL_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
    },

    /// Print the canonical signing payload of a feed or one of its items.
    Canonicalize {
        /// Path to a JSON file, or `-` for stdin.
        file: PathBuf,

        /// Canonicalize the item at this index instead of the feed.
        #[arg(long, value_name = "N")]
        item: Option<usize>,
    },

    /// Migrate a feed to another protocol version and print it as JSON.
    ///
    /// Without --resign the migrated document keeps its old signatures, which
    /// a version change usually invalidates.
    Migrate {
        /// Path to a JSON file, or `-` for stdin.
        file: PathBuf,

        /// Target version, e.g. `1.1` or `https://ansybl.org/version/1.1`.
        #[arg(long, value_name = "VERSION")]
        to: String,

        /// Re-sign the migrated document with ANSYBL_PRIVATE_KEY.
        #[arg(long)]
        resign: bool,

        /// Skip validating the migrated document.
        #[arg(long)]
        no_validate: bool,

        /// JSON array of additional migration rules.
        #[arg(long, value_name = "FILE")]
        rules: Option<PathBuf>,

        /// Private key used by --resign.
        #[arg(long, env = "ANSYBL_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,
    },

    /// Migrate a feed to VERSION and back, and report any data loss.
    Roundtrip {
        /// Path to a JSON file, or `-` for stdin.
        file: PathBuf,

        /// Intermediate version.
        #[arg(long, value_name = "VERSION")]
        via: String,

        /// JSON array of additional migration rules.
        #[arg(long, value_name = "FILE")]
        rules: Option<PathBuf>,

        /// Print the full round-trip report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Feed metadata as read from `new --metadata`.
#[derive(Deserialize)]
struct MetadataFile {
    title: String,
    home_page_url: String,
    feed_url: String,
    author: AuthorFile,
    description: Option<String>,
    icon: Option<String>,
    language: Option<String>,
    version: Option<String>,
}

#[derive(Deserialize)]
struct AuthorFile {
    name: String,
    url: Option<String>,
    avatar: Option<String>,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Keygen => {
            let kp = KeyPair::generate();
            print_json(&json!({
                "public_key": kp.public_key(),
                "private_key": kp.private_key(),
            }));
        }

        Command::Validate { file, json } => {
            let raw = read_json(&file);
            let result = validate_document(&raw);
            let valid = result.valid;
            let report = result.into_report();
            if json {
                print_json(&report);
            } else {
                print!("{}", render_report(&report));
            }
            if !valid {
                process::exit(1);
            }
        }

        Command::Parse {
            file,
            verify,
            strict,
            preserve_extensions,
            json,
        } => {
            let input = read_input(&file);
            let parser = DocParser::new(ParseOptions {
                verify_signatures: verify,
                strict_mode: strict,
                preserve_extensions,
                ..ParseOptions::default()
            });
            let result = parser.parse_str(&input);
            debug!(success = result.success(), degraded = result.is_degraded(), "parsed");

            if json {
                print_json(&json!({
                    "success": result.success(),
                    "degraded": result.is_degraded(),
                    "feed": result.feed(),
                    "degradations": result.degradations(),
                    "errors": result.report.errors,
                    "warnings": result.report.warnings,
                    "signatures": result.signatures,
                }));
            } else {
                if let Some(feed) = result.feed() {
                    print!("{}", render_document(feed));
                }
                eprint!("{}", render_report(&result.report));
            }
            if !result.success() {
                process::exit(1);
            }
        }

        Command::New {
            metadata,
            items,
            private_key,
        } => {
            let kp = KeyPair::from_private_key(&private_key)
                .unwrap_or_else(|e| fatal(&format!("invalid private key: {e}")));
            let meta: MetadataFile = serde_json::from_str(&read_input(&metadata))
                .unwrap_or_else(|e| fatal(&format!("invalid metadata: {e}")));
            let items: Vec<ItemData> = serde_json::from_str(&read_input(&items))
                .unwrap_or_else(|e| fatal(&format!("invalid items: {e}")));

            let version = meta.version.as_deref().map(|v| {
                ProtocolVersion::parse(v).unwrap_or_else(|e| fatal(&format!("invalid version: {e}")))
            });
            let mut author = Author::new(meta.author.name, kp.public_key());
            author.url = meta.author.url;
            author.avatar = meta.author.avatar;
            let mut feed_meta = FeedMetadata::new(meta.title, meta.home_page_url, meta.feed_url, author);
            feed_meta.description = meta.description;
            feed_meta.icon = meta.icon;
            feed_meta.language = meta.language;
            feed_meta.version = version;

            match create_complete_feed(feed_meta, items, kp.signing_key()) {
                Ok(feed) => print_json(&feed),
                Err(e) => {
                    eprintln!("ansybl: {e}");
                    process::exit(1);
                }
            }
        }

        Command::Canonicalize { file, item } => {
            let raw = read_json(&file);
            let (target, mode) = match item {
                None => (&raw, CanonicalMode::Feed),
                Some(n) => match raw.get("items").and_then(|i| i.get(n)) {
                    Some(item) => (item, CanonicalMode::Item),
                    None => fatal(&format!("document has no item at index {n}")),
                },
            };
            let bytes = canonicalize_value(target, mode)
                .unwrap_or_else(|e| fatal(&format!("cannot canonicalize: {e}")));
            println!("{}", String::from_utf8_lossy(&bytes));
        }

        Command::Migrate {
            file,
            to,
            resign,
            no_validate,
            rules,
            private_key,
        } => {
            let doc = load_document(&file);
            let signing_key = if resign {
                let key = private_key
                    .unwrap_or_else(|| fatal("--resign needs ANSYBL_PRIVATE_KEY or --private-key"));
                let kp = KeyPair::from_private_key(&key)
                    .unwrap_or_else(|e| fatal(&format!("invalid private key: {e}")));
                Some(kp.signing_key().clone())
            } else {
                None
            };
            let options = MigrationOptions {
                validate_result: !no_validate,
                signing_key,
                ..MigrationOptions::default()
            };

            let result = Migrator::new(registry(rules.as_ref())).migrate(&doc, &to, &options);
            eprint!("{}", render_report(&result.report));
            match &result.document {
                Some(migrated) if result.success() => {
                    eprintln!(
                        "migrated {} -> {} via {}",
                        result.source_version,
                        result.target_version,
                        if result.steps.is_empty() { "no steps".to_string() } else { result.steps.join(", ") }
                    );
                    print_json(migrated);
                }
                _ => process::exit(1),
            }
        }

        Command::Roundtrip {
            file,
            via,
            rules,
            json,
        } => {
            let doc = load_document(&file);
            let validator = MigrationValidator::new(Migrator::new(registry(rules.as_ref())));
            let report = validator.test_round_trip_migration(&doc, &via);
            if json {
                print_json(&report);
            } else {
                for issue in &report.issues {
                    println!("issue: {issue}");
                }
                for warning in &report.warnings {
                    println!("warning: {warning}");
                }
                println!(
                    "round trip via {via}: {}",
                    if report.success { "lossless" } else { "LOSSY" }
                );
            }
            if !report.success {
                process::exit(1);
            }
        }
    }
}

/// Log filter from ANSYBL_LOG, then RUST_LOG, then warnings from the library.
fn init_logging() {
    let filter = EnvFilter::try_from_env("ANSYBL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "ansybl=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Built-in rules, extended by the rules in `path` when given.
fn registry(path: Option<&PathBuf>) -> MigrationRegistry {
    let mut registry = MigrationRegistry::builtin();
    if let Some(path) = path {
        let extra = MigrationRegistry::from_json(&read_input(path))
            .unwrap_or_else(|e| fatal(&format!("invalid rules in {}: {e}", path.display())));
        registry.extend(extra);
    }
    registry
}

/// Parse a document leniently for migration, refusing degraded results.
fn load_document(path: &PathBuf) -> Document {
    let parser = DocParser::new(ParseOptions {
        preserve_extensions: true,
        ..ParseOptions::default()
    });
    let result = parser.parse_str(&read_input(path));
    if result.is_degraded() || !result.success() {
        fail_with(&result.report, "document could not be read faithfully");
    }
    result
        .into_feed()
        .unwrap_or_else(|| fatal("document could not be read"))
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &PathBuf) -> String {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .unwrap_or_else(|e| fatal(&format!("failed to read stdin: {e}")));
        buf
    } else {
        fs::read_to_string(path)
            .unwrap_or_else(|e| fatal(&format!("failed to read {}: {e}", path.display())))
    }
}

/// Read and decode JSON; malformed JSON is a document failure, not a usage error.
fn read_json(path: &PathBuf) -> Value {
    serde_json::from_str(&read_input(path)).unwrap_or_else(|e| {
        eprintln!("ansybl: invalid JSON: {e}");
        process::exit(1);
    })
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => fatal(&format!("failed to serialise output: {e}")),
    }
}

/// Print a report to stderr and exit with code 1.
fn fail_with(report: &Report, msg: &str) -> ! {
    eprint!("{}", render_report(report));
    eprintln!("ansybl: {msg}");
    process::exit(1);
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("ansybl: {msg}");
    process::exit(2);
}
