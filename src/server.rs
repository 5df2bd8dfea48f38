//! The server half of the request/response negotiation layer: a
//! shared-read/exclusive-write handler registrar, inbound `Data` dispatch,
//! and a thread pool for running handlers concurrently.
//!
//! Per the concurrency model, one encode or decode pass is confined to a
//! single thread; each dispatched message builds its own contexts
//! end-to-end, so handlers never share a pass with one another.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::client::CspPartySettings;
use crate::protocol::{
    self, decode, encode, CommonFlags, CspStruct, DataBody, DataFlags, Header, MessageKind,
    Status, StatusBody, Uuid,
};

/// A server-side callable bound to one input struct identity.
pub trait Handler: Send + Sync {
    /// The request struct this handler accepts.
    type Input: CspStruct;
    /// The response struct this handler produces.
    type Output: CspStruct;

    /// Handles one decoded request, producing a response or a status to
    /// report back to the caller.
    fn call(&self, input: Self::Input) -> protocol::Result<Self::Output>;
}

type DynHandler = Box<
    dyn Fn(&[u8], u8, CommonFlags, DataFlags, u32) -> protocol::Result<Vec<u8>> + Send + Sync,
>;

fn wrap_handler<H: Handler + 'static>(handler: H) -> DynHandler {
    Box::new(
        move |payload: &[u8], protocol_version, common_flags, data_flags, interface_version| {
            let input: H::Input = decode(payload, protocol_version, common_flags, data_flags, interface_version)?;
            let output = handler.call(input)?;
            encode(&output, protocol_version, common_flags, data_flags, interface_version)
        },
    )
}

/// The server side of the protocol: owns the negotiated settings it
/// advertises and the registrar of handlers it dispatches `Data` messages
/// to.
pub struct Server {
    settings: CspPartySettings,
    handlers: RwLock<HashMap<Uuid, DynHandler>>,
}

impl Server {
    /// Creates a server that will advertise `settings` in reply to
    /// `GetSettings`.
    pub fn init(settings: CspPartySettings) -> Self {
        Self {
            settings,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a handler for `input_id`, taking the registrar's exclusive
    /// lock. Replaces any handler previously registered for the same id.
    pub fn register_handler<H: Handler + 'static>(&self, input_id: Uuid, handler: H) {
        log::info!("registering handler for struct id {input_id:?}");
        let mut handlers = self.handlers.write().expect("handler registrar poisoned");
        handlers.insert(input_id, wrap_handler(handler));
    }

    /// Handles one complete inbound message (header plus body) and returns
    /// the complete reply message to send back, implementing the
    /// `GetSettings`/`Data` dispatch flow.
    ///
    /// This never fails: protocol-level problems (unsupported version,
    /// missing handler, a decoding error) are turned into a `Status` reply
    /// rather than propagated, matching a server's obligation to always
    /// answer a request.
    pub fn handle_message(&self, message: &[u8]) -> Vec<u8> {
        let mut cursor = protocol::io::ByteCursor::new(message);
        let header = match Header::read(&mut cursor) {
            Ok(header) => header,
            Err(protocol::CspError::Status(status)) => {
                return status_reply(protocol::latest_protocol_version(), CommonFlags::empty(), status)
            }
            Err(_) => {
                return status_reply(
                    protocol::latest_protocol_version(),
                    CommonFlags::empty(),
                    Status::ErrorInternal,
                )
            }
        };

        match header.message_kind {
            MessageKind::GetSettings => self.settings_reply(&header),
            MessageKind::Data => self.dispatch_data(&header, &mut cursor),
            MessageKind::Status => status_reply(
                header.protocol_version,
                header.common_flags,
                Status::ErrorInvalidArgument,
            ),
        }
    }

    fn settings_reply(&self, request: &Header) -> Vec<u8> {
        let payload = match encode(
            &self.settings,
            request.protocol_version,
            request.common_flags,
            DataFlags::empty(),
            0,
        ) {
            Ok(payload) => payload,
            Err(_) => {
                return status_reply(request.protocol_version, request.common_flags, Status::ErrorInternal)
            }
        };

        let body = DataBody {
            input_struct_id: crate::client::PARTY_SETTINGS_STRUCT_ID,
            data_flags: 0,
            interface_version: 0,
            payload,
        };

        let header = Header {
            protocol_version: request.protocol_version,
            common_flags: request.common_flags,
            message_kind: MessageKind::Data,
        };

        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        body.write(&mut sink);
        sink.into_vec()
    }

    fn dispatch_data(&self, header: &Header, cursor: &mut protocol::io::ByteCursor<'_>) -> Vec<u8> {
        let body = match DataBody::read(cursor) {
            Ok(body) => body,
            Err(protocol::CspError::Status(status)) => {
                return status_reply(header.protocol_version, header.common_flags, status)
            }
            Err(_) => {
                return status_reply(header.protocol_version, header.common_flags, Status::ErrorInternal)
            }
        };

        let handlers = self.handlers.read().expect("handler registrar poisoned");
        let Some(handler) = handlers.get(&body.input_struct_id) else {
            log::debug!("no handler registered for struct id {:?}", body.input_struct_id);
            return status_reply(
                header.protocol_version,
                header.common_flags,
                Status::ErrorNoSuchHandler,
            );
        };

        log::debug!("dispatching struct id {:?} to handler", body.input_struct_id);

        let data_flags = DataFlags::from_bits_truncate(body.data_flags);
        let output = handler(
            &body.payload,
            header.protocol_version,
            header.common_flags,
            data_flags,
            body.interface_version,
        );

        match output {
            Ok(payload) => {
                let reply_body = DataBody {
                    input_struct_id: body.input_struct_id,
                    data_flags: body.data_flags,
                    interface_version: body.interface_version,
                    payload,
                };
                let reply_header = Header {
                    protocol_version: header.protocol_version,
                    common_flags: header.common_flags,
                    message_kind: MessageKind::Data,
                };
                let mut sink = protocol::io::ByteSink::new();
                reply_header.write(&mut sink);
                reply_body.write(&mut sink);
                sink.into_vec()
            }
            Err(protocol::CspError::Status(status)) => {
                status_reply(header.protocol_version, header.common_flags, status)
            }
            Err(_) => status_reply(header.protocol_version, header.common_flags, Status::ErrorInternal),
        }
    }
}

fn status_reply(protocol_version: u8, common_flags: CommonFlags, status: Status) -> Vec<u8> {
    let header = Header {
        protocol_version,
        common_flags,
        message_kind: MessageKind::Status,
    };
    let mut sink = protocol::io::ByteSink::new();
    header.write(&mut sink);
    StatusBody::Simple(status).write(&mut sink);
    sink.into_vec()
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small fixed-size worker pool for dispatching inbound messages
/// concurrently, so one slow handler doesn't stall the others.
///
/// Each dispatched job owns its contexts end-to-end; workers share nothing
/// but the job queue and whatever `Arc` state the caller closes over (a
/// [`Server`], typically).
pub struct ThreadPool {
    workers: Vec<thread::JoinHandle<()>>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    /// Spawns `size` worker threads pulling jobs off a shared queue.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool must have at least one worker");

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || loop {
                    let job = {
                        let receiver = receiver.lock().expect("job queue poisoned");
                        receiver.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Self {
            workers,
            sender: Some(sender),
        }
    }

    /// Queues a job for execution on the next free worker.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CspDeserialize, CspSerialize, Interface, StructCategory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping(i32);
    impl CspStruct for Ping {
        fn descriptor() -> protocol::StructDescriptor {
            protocol::StructDescriptor {
                id: Uuid::from_fields(0x7069_6e67, 0, 0, 0, 1),
                interface: Interface::UNDEFINED,
                latest_private_version: 0,
                min_supported_private_version: 0,
                category: StructCategory::AlwaysSimplyAssignable,
            }
        }
        fn serialize_body(&self, ctx: &mut protocol::SCtx<'_>) -> protocol::Result<()> {
            self.0.serialize(ctx)
        }
        fn deserialize_body(ctx: &mut protocol::DCtx<'_>) -> protocol::Result<Self> {
            Ok(Ping(i32::deserialize(ctx)?))
        }
    }

    struct Pong(i32);
    impl CspStruct for Pong {
        fn descriptor() -> protocol::StructDescriptor {
            protocol::StructDescriptor {
                id: Uuid::from_fields(0x706f_6e67, 0, 0, 0, 1),
                interface: Interface::UNDEFINED,
                latest_private_version: 0,
                min_supported_private_version: 0,
                category: StructCategory::AlwaysSimplyAssignable,
            }
        }
        fn serialize_body(&self, ctx: &mut protocol::SCtx<'_>) -> protocol::Result<()> {
            self.0.serialize(ctx)
        }
        fn deserialize_body(ctx: &mut protocol::DCtx<'_>) -> protocol::Result<Self> {
            Ok(Pong(i32::deserialize(ctx)?))
        }
    }

    struct Echo;
    impl Handler for Echo {
        type Input = Ping;
        type Output = Pong;
        fn call(&self, input: Ping) -> protocol::Result<Pong> {
            Ok(Pong(input.0))
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

    fn build_request(input_id: Uuid, payload: Vec<u8>) -> Vec<u8> {
        let header = Header {
            protocol_version: 1,
            common_flags: CommonFlags::empty(),
            message_kind: MessageKind::Data,
        };
        let body = DataBody {
            input_struct_id: input_id,
            data_flags: 0,
            interface_version: 0,
            payload,
        };
        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);
        body.write(&mut sink);
        sink.into_vec()
    }

    #[test]
    fn missing_handler_replies_with_status() {
        let server = Server::init(sample_settings());
        let request = build_request(Uuid::from_fields(0xffff_ffff, 0, 0, 0, 0), vec![]);
        let reply = server.handle_message(&request);

        let mut cursor = protocol::io::ByteCursor::new(&reply);
        let header = Header::read(&mut cursor).unwrap();
        assert_eq!(header.message_kind, MessageKind::Status);
        let status = StatusBody::read(&mut cursor).unwrap();
        assert_eq!(status.status(), Status::ErrorNoSuchHandler);
    }

    #[test]
    fn registered_handler_round_trips_a_call() {
        let server = Server::init(sample_settings());
        server.register_handler(Ping::descriptor().id, Echo);

        let payload = encode(&Ping(41), 1, CommonFlags::empty(), DataFlags::empty(), 0).unwrap();
        let request = build_request(Ping::descriptor().id, payload);
        let reply = server.handle_message(&request);

        let mut cursor = protocol::io::ByteCursor::new(&reply);
        let header = Header::read(&mut cursor).unwrap();
        assert_eq!(header.message_kind, MessageKind::Data);
        let body = DataBody::read(&mut cursor).unwrap();
        let pong: Pong = decode(&body.payload, 1, CommonFlags::empty(), DataFlags::empty(), 0).unwrap();
        assert_eq!(pong.0, 41);
    }

    #[test]
    fn get_settings_replies_with_data() {
        let server = Server::init(sample_settings());
        let header = Header {
            protocol_version: 1,
            common_flags: CommonFlags::empty(),
            message_kind: MessageKind::GetSettings,
        };
        let mut sink = protocol::io::ByteSink::new();
        header.write(&mut sink);

        let reply = server.handle_message(&sink.into_vec());
        let mut cursor = protocol::io::ByteCursor::new(&reply);
        let reply_header = Header::read(&mut cursor).unwrap();
        assert_eq!(reply_header.message_kind, MessageKind::Data);
    }

    #[test]
    fn thread_pool_runs_every_job() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
