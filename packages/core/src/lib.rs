//! Core of the Ansybl content-syndication protocol.
//!
//! This crate provides the document types, canonical serialization, Ed25519
//! signing, validation, resilient parsing, version migration and generation
//! that make up an Ansybl implementation. It does no I/O: fetching, key
//! storage and persistence belong to the caller. It is the foundation for
//! the `ansybl` CLI.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Wire types: [`Document`], [`Item`], [`Author`], [`Attachment`], [`Interactions`] |
//! | [`version`] | Protocol version URIs via [`ProtocolVersion`] |
//! | [`canonical`] | JCS canonical payloads for signing |
//! | [`keys`] | `ed25519:<base64>` key strings and [`KeyPair`] |
//! | [`signing`] | Signing and verification of payloads, items and documents |
//! | [`report`] | Error taxonomy: [`ErrorCode`], [`ReportEntry`], [`Report`] |
//! | [`validation`] | Structural checks via [`validate_document`] |
//! | [`parser`] | Untrusted input → [`ParseResult`], with graceful degradation |
//! | [`generator`] | Building and signing documents |
//! | [`migration`] | Rule-driven version migration and round-trip checks |
//! | [`render`] | Human-readable text rendering of documents and reports |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ansybl::{create_complete_feed, Author, FeedMetadata, ItemData, KeyPair, ParseOptions, Parser};
//!
//! let kp = KeyPair::generate();
//! let meta = FeedMetadata::new(
//!     "T",
//!     "https://e.com",
//!     "https://e.com/f.ansybl",
//!     Author::new("A", kp.public_key()),
//! );
//! let items = vec![ItemData::new("https://e.com/1", "https://e.com/1").text("hi")];
//! let feed = create_complete_feed(meta, items, kp.signing_key())?;
//!
//! let parsed = Parser::new(ParseOptions::verified()).parse_document(&feed);
//! assert!(parsed.signatures.all_valid);
//! ```

pub mod canonical;
pub mod generator;
pub mod keys;
pub mod migration;
pub mod parser;
pub mod render;
pub mod report;
pub mod signing;
pub mod types;
pub mod validation;
pub mod version;

pub use canonical::{canonicalize_document, canonicalize_item, canonicalize_value, CanonicalError, CanonicalMode};
pub use generator::{
    add_item, create_complete_feed, create_feed, remove_item, sign_feed, update_item, FeedMetadata,
    GeneratorError, ItemData,
};
pub use keys::{KeyError, KeyPair};
pub use migration::{
    MigrationOptions, MigrationRegistry, MigrationResult, MigrationRule, MigrationValidator, Migrator,
    RoundTripReport,
};
pub use parser::{
    Degradation, ParseOptions, ParseOutcome, ParseResult, Parser, SignatureReport, SignatureStatus,
};
pub use report::{Category, ErrorCode, Report, ReportEntry};
pub use signing::{
    sign_content, sign_document, sign_item, verify_document, verify_item, verify_signature,
    SignatureAlgorithm, SigningError,
};
pub use types::{Attachment, Author, Document, Extensions, Interactions, Item};
pub use validation::{validate_document, validate_item, ValidationResult};
pub use version::{ProtocolVersion, VersionError};
