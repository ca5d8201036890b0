//! Transport Plugin contract and its two implementations: a built-in UDP
//! plugin always available as a fallback target, and a dynamically-loaded
//! plugin opened via `libloading` for whatever the operator configured under
//! `plugins.transport`.

use std::ffi::{c_char, c_void, CStr};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use shared::CONNECTION_QUEUE_CAPACITY;

/// Per-send failure classification: `timeout | network-down | other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    Timeout,
    NetworkDown,
    /// Anything the plugin layer cannot classify into a more specific bucket.
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    SetupFailed(String),
    #[error("transport plugin version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: String, actual: String },
}

/// Version string every dynamically-loaded transport plugin must report
/// before it is trusted; guards against loading a library built against a
/// different vtable ABI.
pub const EXPECTED_PLUGIN_VERSION: &str = "lockstep-transport-1";

/// Best-effort, non-blocking datagram transport to a named peer.
///
/// `receive` MUST return immediately with `None` rather than block; plugin
/// implementations run their own I/O threads and hand datagrams off through
/// an internal bounded queue.
pub trait TransportPlugin: Send {
    fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError>;
    fn send(&self, bytes: &[u8], target: &str) -> Result<(), SendFailure>;
    fn receive(&self) -> Option<(Vec<u8>, String)>;
    fn destroy(&mut self);
    fn version(&self) -> &str;
}

fn classify_io_error(err: &std::io::Error) -> SendFailure {
    use std::io::ErrorKind::*;
    match err.kind() {
        TimedOut | WouldBlock => SendFailure::Timeout,
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected => {
            SendFailure::NetworkDown
        }
        _ => SendFailure::Other,
    }
}

/// Default transport: a raw UDP socket with its own receiver thread pool,
/// matching the Fallback variant's "single UDP socket with its own I/O
/// worker pool (default 2 threads)".
pub struct UdpTransportPlugin {
    pub(crate) socket: Option<Arc<StdUdpSocket>>,
    inbound: Arc<ArrayQueue<(Vec<u8>, String)>>,
    running: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    io_threads: usize,
}

impl UdpTransportPlugin {
    pub fn new(io_threads: usize) -> Self {
        Self {
            socket: None,
            inbound: Arc::new(ArrayQueue::new(CONNECTION_QUEUE_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            io_threads: io_threads.max(1),
        }
    }
}

impl TransportPlugin for UdpTransportPlugin {
    fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| TransportError::SetupFailed(format!("invalid bind address: {e}")))?;
        let socket = StdUdpSocket::bind(addr)
            .map_err(|e| TransportError::SetupFailed(e.to_string()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .map_err(|e| TransportError::SetupFailed(e.to_string()))?;
        let socket = Arc::new(socket);
        self.socket = Some(Arc::clone(&socket));
        self.running.store(true, Ordering::SeqCst);

        for _ in 0..self.io_threads {
            let socket = Arc::clone(&socket);
            let inbound = Arc::clone(&self.inbound);
            let running = Arc::clone(&self.running);
            self.workers.push(thread::spawn(move || {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            let _ = inbound.push((buf[..len].to_vec(), from.to_string()));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(_) => continue,
                    }
                }
            }));
        }
        Ok(())
    }

    fn send(&self, bytes: &[u8], target: &str) -> Result<(), SendFailure> {
        let socket = self.socket.as_ref().ok_or(SendFailure::NetworkDown)?;
        let addr: SocketAddr = target.parse().map_err(|_| SendFailure::Other)?;
        socket
            .send_to(bytes, addr)
            .map(|_| ())
            .map_err(|e| classify_io_error(&e))
    }

    fn receive(&self) -> Option<(Vec<u8>, String)> {
        self.inbound.pop()
    }

    fn destroy(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.socket = None;
    }

    fn version(&self) -> &str {
        "udp-builtin-1"
    }
}

impl Drop for UdpTransportPlugin {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// C ABI a dynamically-loaded transport library must export a
/// `transport_plugin_entry` function returning. `instance` is an opaque
/// handle the library owns; every other function takes it as first argument.
#[repr(C)]
pub struct RawTransportVTable {
    pub instance: *mut c_void,
    pub setup: extern "C" fn(*mut c_void, *const c_char, u16) -> i32,
    pub send: extern "C" fn(*mut c_void, *const u8, usize, *const c_char) -> i32,
    pub receive: extern "C" fn(*mut c_void, *mut u8, usize) -> isize,
    pub destroy: extern "C" fn(*mut c_void),
    pub version: extern "C" fn(*mut c_void) -> *const c_char,
}

type EntryFn = unsafe extern "C" fn() -> RawTransportVTable;

/// Wraps a dynamically-loaded transport library behind the same
/// [`TransportPlugin`] contract the built-in UDP plugin exposes.
///
/// Keeps the `libloading::Library` alive for the plugin's whole lifetime:
/// dropping it before `destroy()` has released the library's own resources
/// would unmap code the vtable's function pointers point into.
pub struct DynamicTransportPlugin {
    _library: libloading::Library,
    vtable: RawTransportVTable,
    recv_buf: Vec<u8>,
}

// SAFETY: `RawTransportVTable::instance` is an opaque handle the loaded
// library allocates and only ever dereferences inside the extern "C"
// functions on the same vtable. Nothing here shares `instance` across
// threads concurrently; `Connection` confines each plugin to the single
// thread that owns it (the server thread for setup/send, its own worker
// pool only reading through the bounded queue the vtable fills), so moving
// the whole plugin to another thread between calls is sound even though
// the raw pointer itself carries no compiler-checked thread-safety.
unsafe impl Send for DynamicTransportPlugin {}

impl DynamicTransportPlugin {
    pub fn load(path: &str, expected_version: &str, mtu: usize) -> Result<Self, TransportError> {
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| TransportError::SetupFailed(format!("{path}: {e}")))?;
        let entry: libloading::Symbol<EntryFn> = unsafe { library.get(b"transport_plugin_entry\0") }
            .map_err(|e| TransportError::SetupFailed(format!("missing entry point: {e}")))?;
        let vtable = unsafe { entry() };
        let plugin = Self {
            _library: library,
            vtable,
            recv_buf: vec![0u8; mtu],
        };
        let actual = plugin.version().to_string();
        if actual != expected_version {
            return Err(TransportError::VersionMismatch {
                expected: expected_version.to_string(),
                actual,
            });
        }
        Ok(plugin)
    }
}

impl TransportPlugin for DynamicTransportPlugin {
    fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let host_c = std::ffi::CString::new(host)
            .map_err(|e| TransportError::SetupFailed(e.to_string()))?;
        let rc = (self.vtable.setup)(self.vtable.instance, host_c.as_ptr(), port);
        if rc == 0 {
            Ok(())
        } else {
            Err(TransportError::SetupFailed(format!("plugin setup returned {rc}")))
        }
    }

    fn send(&self, bytes: &[u8], target: &str) -> Result<(), SendFailure> {
        let target_c = std::ffi::CString::new(target).map_err(|_| SendFailure::Other)?;
        let rc = (self.vtable.send)(
            self.vtable.instance,
            bytes.as_ptr(),
            bytes.len(),
            target_c.as_ptr(),
        );
        match rc {
            0 => Ok(()),
            1 => Err(SendFailure::Timeout),
            2 => Err(SendFailure::NetworkDown),
            _ => Err(SendFailure::Other),
        }
    }

    fn receive(&self) -> Option<(Vec<u8>, String)> {
        // SAFETY: recv_buf is sized to the configured MTU; the vtable
        // contract promises it never writes past the given length.
        let mut buf = self.recv_buf.clone();
        let n = (self.vtable.receive)(self.vtable.instance, buf.as_mut_ptr(), buf.len());
        if n < 0 {
            return None;
        }
        buf.truncate(n as usize);
        // The wire-format ABI does not carry a sender address back through
        // this path; callers that need peer identity use the redundancy
        // manager's configured peer table instead.
        Some((buf, String::new()))
    }

    fn destroy(&mut self) {
        (self.vtable.destroy)(self.vtable.instance);
    }

    fn version(&self) -> &str {
        let ptr = (self.vtable.version)(self.vtable.instance);
        if ptr.is_null() {
            return "";
        }
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_plugin_round_trips_a_datagram() {
        let mut a = UdpTransportPlugin::new(1);
        let mut b = UdpTransportPlugin::new(1);
        a.setup("127.0.0.1", 0).unwrap();
        b.setup("127.0.0.1", 0).unwrap();

        let a_addr = a.socket.as_ref().unwrap().local_addr().unwrap();
        let b_addr = b.socket.as_ref().unwrap().local_addr().unwrap();

        a.send(b"hello", &b_addr.to_string()).unwrap();

        let mut received = None;
        for _ in 0..50 {
            if let Some((bytes, _)) = b.receive() {
                received = Some(bytes);
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
        let _ = a_addr;

        a.destroy();
        b.destroy();
    }

    #[test]
    fn classify_wouldblock_as_timeout() {
        let err = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert_eq!(classify_io_error(&err), SendFailure::Timeout);
    }

    #[test]
    fn classify_connection_reset_as_network_down() {
        let err = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert_eq!(classify_io_error(&err), SendFailure::NetworkDown);
    }

    #[test]
    fn classify_unknown_as_other() {
        let err = std::io::Error::from(std::io::ErrorKind::Unsupported);
        assert_eq!(classify_io_error(&err), SendFailure::Other);
    }
}
