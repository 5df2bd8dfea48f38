//! A pure Rust implementation of the Common Serialization Protocol (CSP), a
//! binary, versioned, schema-full serialization framework with a
//! request/response messaging layer built on top of it.
//!
//! Peers exchange typed structures over an opaque byte channel. The protocol
//! negotiates wire-format capabilities, preserves backward compatibility
//! across interface revisions, and survives differences in endianness,
//! machine word size, and structure layout between sender and receiver.
//!
//! The crate is organized the way the protocol itself is layered:
//!
//!   - [`protocol`] is the serialization engine: contexts, primitive and
//!     aggregate processing, struct category dispatch, version translation,
//!     and the message envelope format.
//!   - [`client`] and [`server`] build a request/response negotiation layer
//!     on top of `protocol`.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications,
    variant_size_differences
)]

pub mod protocol;

pub mod client;
pub mod server;
