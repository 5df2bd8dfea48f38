//! The client half of the request/response negotiation layer: settings
//! bootstrap against a server, and typed request/response calls once a
//! session has been negotiated.

use thiserror::Error;

use crate::protocol::{
    self, decode, encode, CommonFlags, CspError, CspStruct, DataBody, DataFlags, Header,
    Interface, MessageKind, Status, StatusBody, Uuid,
};

/// An abstract "send bytes, receive bytes" channel. The transport itself
/// (sockets, shared memory, in-process call) is outside the engine's
/// concern; a [`Client`] only needs this much to speak the protocol over it.
pub trait Transport {
    /// Sends one complete message.
    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    /// Blocks until one complete message has arrived, and returns it.
    fn receive(&mut self) -> std::io::Result<Vec<u8>>;
}

/// An error encountered by a [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// A transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// A protocol engine error.
    #[error(transparent)]
    Protocol(#[from] CspError),
    /// `call` or `init` was attempted on a session that is not (or no
    /// longer) initialized.
    #[error("session is not initialized")]
    NotInited,
    /// The peer's settings were incompatible with this client's.
    #[error("incompatible party settings: {0}")]
    IncompatibleSettings(String),
    /// The server replied with a status instead of the expected data.
    #[error("server returned status: {0:?}")]
    ServerStatus(Status),
}

/// The capability bundle a peer advertises at session start: the protocol
/// versions, common flags, and interfaces it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspPartySettings {
    /// Protocol versions this party understands, newest first.
    pub protocol_versions: Vec<u8>,
    /// Common flags this party always sets.
    pub mandatory_common_flags: CommonFlags,
    /// Common flags this party never sets.
    pub forbidden_common_flags: CommonFlags,
    /// The interfaces this party can serve or consume.
    pub interfaces: Vec<Interface>,
}

/// The well-known identity `CspPartySettings` is framed under. Settings
/// exchange is bootstrap traffic, not application data, so it lives outside
/// any user-defined interface.
pub const PARTY_SETTINGS_STRUCT_ID: Uuid = Uuid::from_fields(0xc5b0_0701, 0, 0, 0, 1);

impl CspStruct for CspPartySettings {
    fn descriptor() -> protocol::StructDescriptor {
        protocol::StructDescriptor {
            id: PARTY_SETTINGS_STRUCT_ID,
            interface: Interface::UNDEFINED,
            latest_private_version: 0,
            min_supported_private_version: 0,
            category: protocol::StructCategory::General,
        }
    }

    fn serialize_body(&self, ctx: &mut protocol::SCtx<'_>) -> protocol::Result<()> {
        use protocol::CspSerialize;
        self.protocol_versions.serialize(ctx)?;
        self.mandatory_common_flags.bits().serialize(ctx)?;
        self.forbidden_common_flags.bits().serialize(ctx)?;
        protocol::write_size_t(self.interfaces.len(), ctx)?;
        for iface in &self.interfaces {
            ctx.append(iface.id.as_bytes());
            iface.version.serialize(ctx)?;
            iface.min_supported_version.serialize(ctx)?;
            iface.mandatory_data_flags.bits().serialize(ctx)?;
            iface.forbidden_data_flags.bits().serialize(ctx)?;
        }
        Ok(())
    }

    fn deserialize_body(ctx: &mut protocol::DCtx<'_>) -> protocol::Result<Self> {
        use protocol::CspDeserialize;
        let protocol_versions = Vec::<u8>::deserialize(ctx)?;
        let mandatory_common_flags = CommonFlags::from_bits_truncate(u16::deserialize(ctx)?);
        let forbidden_common_flags = CommonFlags::from_bits_truncate(u16::deserialize(ctx)?);
        let count = protocol::read_size_t(ctx)?;
        let mut interfaces = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let mut id_bytes = [0u8; 16];
            id_bytes.copy_from_slice(ctx.read_bytes(16)?);
            interfaces.push(Interface {
                id: Uuid::from_bytes(id_bytes),
                version: u32::deserialize(ctx)?,
                min_supported_version: u32::deserialize(ctx)?,
                mandatory_data_flags: DataFlags::from_bits_truncate(u32::deserialize(ctx)?),
                forbidden_data_flags: DataFlags::from_bits_truncate(u32::deserialize(ctx)?),
            });
        }
        Ok(CspPartySettings {
            protocol_versions,
            mandatory_common_flags,
            forbidden_common_flags,
            interfaces,
        })
    }
}

/// What a [`Client`] and its server agreed on after a successful
/// [`Client::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    protocol_version: u8,
    common_flags: CommonFlags,
    interfaces: Vec<Interface>,
}

/// A type whose requests a server can be called with: the input struct sent
/// and the output struct expected back.
pub trait ClientCall {
    /// The request struct.
    type Input: CspStruct;
    /// The response struct.
    type Output: CspStruct;
}

/// Drives the client side of the protocol over a [`Transport`]: settings
/// bootstrap, then typed calls.
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
    local: CspPartySettings,
    session: Option<Session>,
}

impl<T: Transport> Client<T> {
    /// Creates a client that will advertise `local` during bootstrap.
    pub fn new(transport: T, local: CspPartySettings) -> Self {
        Self {
            transport,
            local,
            session: None,
        }
    }

    /// Returns `true` if [`Client::init`] has completed successfully.
    pub fn is_inited(&self) -> bool {
        self.session.is_some()
    }

    /// Performs the settings bootstrap: sends `GetSettings`, validates the
    /// server's `CspPartySettings` against this client's, and negotiates a
    /// session. On any failure the session is left uninitialized.
    pub fn init(&mut self) -> Result<(), ClientError> {
        self.session = None;
        log::info!("starting settings bootstrap");

        let header = Header {
            protocol_version: protocol::latest_protocol_version(),
            common_flags: self.local.mandatory_common_flags,
            message_kind: MessageKind::GetSettings,
        };
        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        self.transport.send(sink.as_slice())?;

        let response = self.transport.receive()?;
        let mut cursor = protocol::io::ByteCursor::new(&response);
        let response_header = Header::read(&mut cursor)?;

        match response_header.message_kind {
            MessageKind::Status => {
                let status = StatusBody::read(&mut cursor)?;
                Err(ClientError::ServerStatus(status.status()))
            }
            MessageKind::Data => {
                let body = DataBody::read(&mut cursor)?;
                let server: CspPartySettings = decode(
                    &body.payload,
                    response_header.protocol_version,
                    response_header.common_flags,
                    DataFlags::from_bits_truncate(body.data_flags),
                    body.interface_version,
                )?;
                let session = negotiate(&self.local, &server)?;
                log::info!(
                    "negotiated protocol version {} with {} common interfaces",
                    session.protocol_version,
                    session.interfaces.len()
                );
                self.session = Some(session);
                Ok(())
            }
            MessageKind::GetSettings => Err(ClientError::IncompatibleSettings(
                "server echoed GetSettings instead of replying with Data".to_string(),
            )),
        }
    }

    /// Makes a typed request/response call. Fails with
    /// [`ClientError::NotInited`] if [`Client::init`] hasn't succeeded yet.
    pub fn call<C: ClientCall>(&mut self, input: &C::Input) -> Result<C::Output, ClientError> {
        let session = self.session.as_ref().ok_or(ClientError::NotInited)?;
        log::debug!("calling struct id {:?}", C::Input::descriptor().id);

        let interface_version = session
            .interfaces
            .iter()
            .find(|iface| iface.id == C::Input::descriptor().interface.id)
            .map(|iface| iface.version)
            .unwrap_or(C::Input::descriptor().interface.version);

        let data_flags = DataFlags::empty();
        let payload = encode(
            input,
            session.protocol_version,
            session.common_flags,
            data_flags,
            interface_version,
        )?;

        let body = DataBody {
            input_struct_id: C::Input::descriptor().id,
            data_flags: data_flags.bits(),
            interface_version,
            payload,
        };

        let header = Header {
            protocol_version: session.protocol_version,
            common_flags: session.common_flags,
            message_kind: MessageKind::Data,
        };

        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        body.write(&mut sink);
        self.transport.send(sink.as_slice())?;

        let response = self.transport.receive()?;
        let mut cursor = protocol::io::ByteCursor::new(&response);
        let response_header = Header::read(&mut cursor)?;

        match response_header.message_kind {
            MessageKind::Status => {
                let status = StatusBody::read(&mut cursor)?;
                Err(ClientError::ServerStatus(status.status()))
            }
            MessageKind::Data => {
                let body = DataBody::read(&mut cursor)?;
                let output = decode(
                    &body.payload,
                    response_header.protocol_version,
                    response_header.common_flags,
                    DataFlags::from_bits_truncate(body.data_flags),
                    body.interface_version,
                )?;
                Ok(output)
            }
            MessageKind::GetSettings => Err(ClientError::IncompatibleSettings(
                "server echoed GetSettings instead of replying with Data".to_string(),
            )),
        }
    }
}

/// Negotiates a session from this client's local settings and the server's
/// advertised settings, per the subset/intersection rules of the
/// client/server bootstrap.
fn negotiate(local: &CspPartySettings, remote: &CspPartySettings) -> Result<Session, ClientError> {
    if remote.mandatory_common_flags.intersects(local.forbidden_common_flags) {
        return Err(ClientError::IncompatibleSettings(
            "server requires common flags this client forbids".to_string(),
        ));
    }
    if local
        .mandatory_common_flags
        .intersects(remote.forbidden_common_flags)
    {
        return Err(ClientError::IncompatibleSettings(
            "client requires common flags the server forbids".to_string(),
        ));
    }

    let protocol_version = local
        .protocol_versions
        .iter()
        .filter(|v| remote.protocol_versions.contains(v))
        .max()
        .copied()
        .ok_or_else(|| ClientError::IncompatibleSettings("no common protocol version".to_string()))?;

    let common_flags = local.mandatory_common_flags | remote.mandatory_common_flags;

    let mut interfaces = Vec::new();
    for local_iface in &local.interfaces {
        let Some(remote_iface) = remote.interfaces.iter().find(|i| i.id == local_iface.id) else {
            continue;
        };
        if remote_iface.version < local_iface.version {
            return Err(ClientError::IncompatibleSettings(format!(
                "server's interface {:?} version {} is below client minimum {}",
                local_iface.id, remote_iface.version, local_iface.version
            )));
        }
        interfaces.push(*remote_iface);
    }

    Ok(Session {
        protocol_version,
        common_flags,
        interfaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct LoopbackTransport {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl Transport for LoopbackTransport {
        fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn receive(&mut self) -> std::io::Result<Vec<u8>> {
            self.inbox.pop_front().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no queued response")
            })
        }
    }

    fn sample_settings() -> CspPartySettings {
        CspPartySettings {
            protocol_versions: vec![1],
            mandatory_common_flags: CommonFlags::empty(),
            forbidden_common_flags: CommonFlags::empty(),
            interfaces: vec![],
        }
    }

    #[test]
    fn init_fails_without_a_queued_response() {
        let transport = LoopbackTransport {
            inbox: VecDeque::new(),
            sent: Vec::new(),
        };
        let mut client = Client::new(transport, sample_settings());
        assert!(client.init().is_err());
        assert!(!client.is_inited());
    }

    #[test]
    fn init_succeeds_against_compatible_server_settings() {
        let server_settings = sample_settings();
        let payload = encode(
            &server_settings,
            1,
            CommonFlags::empty(),
            DataFlags::empty(),
            0,
        )
        .unwrap();

        let body = DataBody {
            input_struct_id: PARTY_SETTINGS_STRUCT_ID,
            data_flags: 0,
            interface_version: 0,
            payload,
        };
        let header = Header {
            protocol_version: 1,
            common_flags: CommonFlags::empty(),
            message_kind: MessageKind::Data,
        };
        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        body.write(&mut sink);

        let transport = LoopbackTransport {
            inbox: VecDeque::from([sink.into_vec()]),
            sent: Vec::new(),
        };
        let mut client = Client::new(transport, sample_settings());
        client.init().unwrap();
        assert!(client.is_inited());
    }

    #[test]
    fn call_before_init_is_rejected() {
        #[derive(Debug)]
        struct Noop;
        impl CspStruct for Noop {
            fn descriptor() -> protocol::StructDescriptor {
                CspPartySettings::descriptor()
            }
            fn serialize_body(&self, _ctx: &mut protocol::SCtx<'_>) -> protocol::Result<()> {
                Ok(())
            }
            fn deserialize_body(_ctx: &mut protocol::DCtx<'_>) -> protocol::Result<Self> {
                Ok(Noop)
            }
        }
        struct NoopCall;
        impl ClientCall for NoopCall {
            type Input = Noop;
            type Output = Noop;
        }

        let transport = LoopbackTransport {
            inbox: VecDeque::new(),
            sent: Vec::new(),
        };
        let mut client = Client::new(transport, sample_settings());
        let err = client.call::<NoopCall>(&Noop).unwrap_err();
        assert!(matches!(err, ClientError::NotInited));
    }

    #[test]
    fn client_init_rejects_a_server_interface_below_its_floor() {
        let legacy_interface = Interface {
            id: Uuid::from_fields(0x6966_6163, 0x6500, 0, 0, 1),
            version: 1,
            min_supported_version: 1,
            mandatory_data_flags: DataFlags::empty(),
            forbidden_data_flags: DataFlags::empty(),
        };

        let client_settings = CspPartySettings {
            protocol_versions: vec![1],
            mandatory_common_flags: CommonFlags::empty(),
            forbidden_common_flags: CommonFlags::empty(),
            interfaces: vec![Interface {
                version: 5,
                min_supported_version: 5,
                ..legacy_interface
            }],
        };

        // This client requires interface version 5; a server only offering
        // version 1 of the same interface is behind the client's floor.
        let server_settings = CspPartySettings {
            protocol_versions: vec![1],
            mandatory_common_flags: CommonFlags::empty(),
            forbidden_common_flags: CommonFlags::empty(),
            interfaces: vec![legacy_interface],
        };

        let payload = encode(&server_settings, 1, CommonFlags::empty(), DataFlags::empty(), 0).unwrap();
        let body = DataBody {
            input_struct_id: PARTY_SETTINGS_STRUCT_ID,
            data_flags: 0,
            interface_version: 0,
            payload,
        };
        let header = Header {
            protocol_version: 1,
            common_flags: CommonFlags::empty(),
            message_kind: MessageKind::Data,
        };
        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        body.write(&mut sink);

        let transport = LoopbackTransport {
            inbox: VecDeque::from([sink.into_vec()]),
            sent: Vec::new(),
        };
        let mut client = Client::new(transport, client_settings);
        let err = client.init().unwrap_err();
        assert!(!client.is_inited());
        assert!(matches!(err, ClientError::IncompatibleSettings(_)));
    }
}
