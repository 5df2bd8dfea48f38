//! A self-contained client/server exchange over an in-process transport.
//!
//! Run with:
//!     cargo run --example loopback
//!
//! Walks through a settings bootstrap, a typed call, and the handful of
//! failure modes a real transport would eventually produce: a missing
//! handler, an unsupported protocol version, and a private-version
//! downgrade.

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::{bail, Result};

use csp::client::{Client, ClientCall, CspPartySettings, Transport};
use csp::protocol::{
    self, negotiate_version, CommonFlags, ConverterChain, CspDeserialize, CspSerialize, CspStruct,
    DCtx, DataFlags, Interface, SCtx, StatusBody, StructCategory, StructDescriptor,
    TypeRegistry, Uuid, VersionConverter,
};
use csp::server::{Handler, Server};

const GREETING_INTERFACE: Interface = Interface {
    id: Uuid::from_fields(0x6772_6565, 0x7469, 0x6e67, 0, 1),
    version: 1,
    min_supported_version: 1,
    mandatory_data_flags: DataFlags::empty(),
    forbidden_data_flags: DataFlags::empty(),
};

/// The request half of the `SayHello` call.
#[derive(Debug, Clone)]
struct Greeting {
    name: String,
}

impl CspStruct for Greeting {
    fn descriptor() -> StructDescriptor {
        StructDescriptor {
            id: Uuid::from_fields(0x6772_6565, 0x7469, 0x6e67, 1, 1),
            interface: GREETING_INTERFACE,
            latest_private_version: 0,
            min_supported_private_version: 0,
            category: StructCategory::General,
        }
    }

    fn serialize_body(&self, ctx: &mut SCtx<'_>) -> protocol::Result<()> {
        self.name.serialize(ctx)
    }

    fn deserialize_body(ctx: &mut DCtx<'_>) -> protocol::Result<Self> {
        Ok(Greeting {
            name: String::deserialize(ctx)?,
        })
    }
}

/// The response half of the `SayHello` call.
#[derive(Debug, Clone)]
struct Farewell {
    message: String,
}

impl CspStruct for Farewell {
    fn descriptor() -> StructDescriptor {
        StructDescriptor {
            id: Uuid::from_fields(0x6772_6565, 0x7469, 0x6e67, 2, 1),
            interface: GREETING_INTERFACE,
            latest_private_version: 0,
            min_supported_private_version: 0,
            category: StructCategory::General,
        }
    }

    fn serialize_body(&self, ctx: &mut SCtx<'_>) -> protocol::Result<()> {
        self.message.serialize(ctx)
    }

    fn deserialize_body(ctx: &mut DCtx<'_>) -> protocol::Result<Self> {
        Ok(Farewell {
            message: String::deserialize(ctx)?,
        })
    }
}

struct SayHello;
impl ClientCall for SayHello {
    type Input = Greeting;
    type Output = Farewell;
}

struct GreetingHandler;
impl Handler for GreetingHandler {
    type Input = Greeting;
    type Output = Farewell;

    fn call(&self, input: Greeting) -> protocol::Result<Farewell> {
        Ok(Farewell {
            message: format!("hello, {}!", input.name),
        })
    }
}

/// A transport that hands every sent message straight to a [`Server`]
/// running in the same process, queuing its reply for the next `receive`.
struct LoopbackTransport {
    server: Arc<Server>,
    pending: RefCell<Option<Vec<u8>>>,
}

impl LoopbackTransport {
    fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            pending: RefCell::new(None),
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let reply = self.server.handle_message(bytes);
        *self.pending.borrow_mut() = Some(reply);
        Ok(())
    }

    fn receive(&mut self) -> std::io::Result<Vec<u8>> {
        self.pending.borrow_mut().take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no reply queued")
        })
    }
}

fn party_settings() -> CspPartySettings {
    CspPartySettings {
        protocol_versions: vec![protocol::latest_protocol_version()],
        mandatory_common_flags: CommonFlags::empty(),
        forbidden_common_flags: CommonFlags::empty(),
        interfaces: vec![GREETING_INTERFACE],
    }
}

fn main() -> Result<()> {
    let server = Arc::new(Server::init(party_settings()));
    server.register_handler(Greeting::descriptor().id, GreetingHandler);

    // Scenario 1: settings bootstrap, then a round-tripped call.
    let transport = LoopbackTransport::new(server.clone());
    let mut client = Client::new(transport, party_settings());
    client.init()?;
    println!("client negotiated a session with the server");

    let reply = client.call::<SayHello>(&Greeting {
        name: "csp".to_string(),
    })?;
    println!("server replied: {}", reply.message);

    // Scenario 2: a struct id the server never registered a handler for.
    struct Unregistered;
    impl CspStruct for Unregistered {
        fn descriptor() -> StructDescriptor {
            let mut d = Greeting::descriptor();
            d.id = Uuid::from_fields(0xdead_beef, 0, 0, 0, 0);
            d
        }
        fn serialize_body(&self, _ctx: &mut SCtx<'_>) -> protocol::Result<()> {
            Ok(())
        }
        fn deserialize_body(_ctx: &mut DCtx<'_>) -> protocol::Result<Self> {
            Ok(Unregistered)
        }
    }
    struct NoSuchCall;
    impl ClientCall for NoSuchCall {
        type Input = Unregistered;
        type Output = Unregistered;
    }

    match client.call::<NoSuchCall>(&Unregistered) {
        Err(err) => println!("missing handler rejected as expected: {err}"),
        Ok(_) => bail!("expected the server to reject an unregistered struct id"),
    }

    // Scenario 3: a header framed under a protocol version this build
    // doesn't understand gets a StatusBody back, not a panic.
    let mut sink = protocol::io::ByteSink::new();
    protocol::Header {
        protocol_version: 0xff,
        common_flags: CommonFlags::empty(),
        message_kind: protocol::MessageKind::GetSettings,
    }
    .write(&mut sink);
    let reply = server.handle_message(sink.as_slice());
    let mut cursor = protocol::io::ByteCursor::new(&reply);
    let header = protocol::Header::read(&mut cursor)?;
    let status = StatusBody::read(&mut cursor)?;
    println!(
        "unsupported protocol version {} => {:?}",
        0xffu8,
        status.status()
    );
    assert_eq!(header.message_kind, protocol::MessageKind::Status);

    // Scenario 4: negotiating a private version downgrade and walking a
    // struct's body through its converter chain.
    negotiate_and_translate_profile()?;

    // Scenario 5: dynamic dispatch by struct id through a `TypeRegistry`,
    // for callers that don't know which concrete type they're decoding.
    dispatch_by_registry()?;

    Ok(())
}

/// `Profile` has gone through one schema revision: version 0 stored only a
/// display name, version 1 adds a separate handle. A receiver that only
/// understands version 1 still needs to accept a version-0 payload, which
/// means walking it through a [`ConverterChain`] on the way in.
#[derive(Debug, Clone, PartialEq)]
struct Profile {
    display_name: String,
    handle: String,
}

struct FillHandleFromDisplayName;
impl VersionConverter<Profile> for FillHandleFromDisplayName {
    fn from_version(&self) -> u32 {
        0
    }
    fn to_version(&self) -> u32 {
        1
    }
    fn convert(&self, body: Profile) -> protocol::Result<Profile> {
        Ok(Profile {
            handle: body.display_name.to_lowercase().replace(' ', "_"),
            ..body
        })
    }
}

impl CspStruct for Profile {
    fn descriptor() -> StructDescriptor {
        StructDescriptor {
            id: Uuid::from_fields(0x7072_6f66, 0x696c, 0x6500, 0, 1),
            interface: Interface::UNDEFINED,
            latest_private_version: 1,
            min_supported_private_version: 0,
            category: StructCategory::General,
        }
    }

    fn serialize_body(&self, ctx: &mut SCtx<'_>) -> protocol::Result<()> {
        self.display_name.serialize(ctx)?;
        self.handle.serialize(ctx)
    }

    fn deserialize_body(ctx: &mut DCtx<'_>) -> protocol::Result<Self> {
        Ok(Profile {
            display_name: String::deserialize(ctx)?,
            handle: String::deserialize(ctx)?,
        })
    }

    fn deserialize_versioned_body(ctx: &mut DCtx<'_>, wire_version: u32) -> protocol::Result<Self> {
        if wire_version == 1 {
            return Self::deserialize_body(ctx);
        }

        let display_name = String::deserialize(ctx)?;
        let chain = ConverterChain::new(Self::descriptor().id, vec![Box::new(FillHandleFromDisplayName)]);
        chain.translate_up(
            Profile {
                display_name,
                handle: String::new(),
            },
            wire_version,
            1,
        )
    }
}

/// Negotiates a private version downgrade and walks a struct's body through
/// its converter chain on decode, using the real `serialize_struct`/`decode`
/// pipeline rather than calling `ConverterChain::translate_up` in isolation.
fn negotiate_and_translate_profile() -> Result<()> {
    let negotiated = negotiate_version(Profile::descriptor().id, 0, 1, 0)?;
    assert_eq!(negotiated, 0, "an old sender only ever encodes version 0");

    // An old sender writes only a display name at private version 0; hand
    // frame the header and body the way `serialize_struct` would have, had
    // `Profile::serialize_body` still targeted version 0.
    let mut sink = protocol::io::ByteSink::new();
    sink.append(Profile::descriptor().id.as_bytes());
    {
        let mut sctx = SCtx::new(&mut sink, protocol::latest_protocol_version(), CommonFlags::empty(), DataFlags::empty(), 0);
        protocol::FlexInt::write(0, &mut sctx)?;
        protocol::FlexInt::write(negotiated as u64, &mut sctx)?;
        "Ada Lovelace".to_string().serialize(&mut sctx)?;
    }

    let bytes = sink.into_vec();
    let mut added = protocol::AddedPointers::new();
    let mut dctx = DCtx::new(&bytes, protocol::latest_protocol_version(), CommonFlags::empty(), DataFlags::empty(), 0, &mut added);
    let received: Profile = protocol::deserialize_struct(&mut dctx)?;

    println!(
        "profile decoded from private version {negotiated} into the latest body: handle = {:?}",
        received.handle
    );
    assert_eq!(received.handle, "ada_lovelace");

    Ok(())
}

/// Decodes an arbitrary struct by looking its wire identity up in a
/// [`TypeRegistry`] instead of assuming a concrete type ahead of time.
fn dispatch_by_registry() -> Result<()> {
    let registry = TypeRegistry::new();
    registry.register(Greeting::descriptor());
    registry.register(Farewell::descriptor());

    let payload = protocol::encode(
        &Farewell {
            message: "goodbye".to_string(),
        },
        protocol::latest_protocol_version(),
        CommonFlags::empty(),
        DataFlags::empty(),
        1,
    )?;

    let mut peek = protocol::io::ByteCursor::new(&payload);
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(peek.read_bytes(16)?);
    let wire_id = Uuid::from_bytes(id_bytes);

    let descriptor = registry
        .lookup(wire_id)
        .ok_or_else(|| anyhow::anyhow!("no descriptor registered for {wire_id:?}"))?;

    let decoded = if descriptor.id == Farewell::descriptor().id {
        let farewell: Farewell = protocol::decode(
            &payload,
            protocol::latest_protocol_version(),
            CommonFlags::empty(),
            DataFlags::empty(),
            1,
        )?;
        farewell.message
    } else {
        bail!("unexpected struct id dispatched")
    };

    println!("registry-dispatched decode produced: {decoded}");
    Ok(())
}
