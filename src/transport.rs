//! Transport seam: named-stream channels to the device.
//!
//! The wire protocol (framing, link discovery, bootloading) lives outside
//! this crate. A [`Transport`] only has to present an open, reliable,
//! ordered channel per named stream plus an abrupt close. Messages crossing
//! the seam are already parsed; payload codecs are external too.
//!
//! [`LoopbackTransport`] is an in-process implementation used by the test
//! suite and by host-only pipelines: the "device" ends of every stream are
//! exposed so a peer (or a test) can inject arrivals and observe sends.

use crate::error::{Error, Result};
use crate::message::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sending half of one named stream (host to device).
#[derive(Clone)]
pub struct StreamSender {
    name: String,
    inner: kanal::Sender<Arc<Message>>,
}

impl StreamSender {
    /// Wrap a kanal sender as a stream endpoint.
    pub fn new(name: impl Into<String>, inner: kanal::Sender<Arc<Message>>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Stream name this sender is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a message toward the device.
    ///
    /// Blocks if the channel is full. Fails once the transport is closed.
    pub fn send(&self, message: Arc<Message>) -> Result<()> {
        self.inner
            .send(message)
            .map_err(|_| Error::Transport(format!("stream '{}' closed", self.name)))
    }

    /// Check if the underlying channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }
}

/// Receiving half of one named stream (device to host).
pub struct StreamReceiver {
    name: String,
    inner: kanal::Receiver<Arc<Message>>,
}

impl StreamReceiver {
    /// Wrap a kanal receiver as a stream endpoint.
    pub fn new(name: impl Into<String>, inner: kanal::Receiver<Arc<Message>>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Stream name this receiver is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next message from the device.
    ///
    /// Blocks until a message arrives. Returns `None` once the transport is
    /// closed and the channel is drained.
    pub fn recv(&self) -> Option<Arc<Message>> {
        self.inner.recv().ok()
    }

    /// Check if the underlying channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }
}

/// An open connection to a device, addressed by named streams.
pub trait Transport: Send + Sync + 'static {
    /// Unique identifier of the connected device, used to derive record
    /// file names.
    fn device_id(&self) -> String;

    /// Open the host-to-device channel for a declared input stream.
    ///
    /// `max_data_size` is the stream's maximum payload hint from the
    /// compiled graph, used to size the underlying channel.
    fn open_input(&self, name: &str, max_data_size: usize) -> Result<StreamSender>;

    /// Open the device-to-host channel for a declared output stream.
    fn open_output(&self, name: &str) -> Result<StreamReceiver>;

    /// Abruptly close every stream, unblocking all senders and receivers.
    fn close(&self);
}

struct LoopbackStream {
    tx: kanal::Sender<Arc<Message>>,
    rx: kanal::Receiver<Arc<Message>>,
}

/// In-process transport backed by kanal channels.
///
/// Every named stream is a single unbounded channel; which end the host
/// holds depends on the stream direction. The opposite ("device") ends are
/// available through [`device_sender`](Self::device_sender) and
/// [`device_receiver`](Self::device_receiver).
pub struct LoopbackTransport {
    device_id: String,
    streams: Mutex<HashMap<String, LoopbackStream>>,
}

impl LoopbackTransport {
    /// Create a loopback transport with the given device identifier.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn stream_ends(&self, name: &str) -> (kanal::Sender<Arc<Message>>, kanal::Receiver<Arc<Message>>) {
        let mut streams = self.streams.lock().unwrap();
        let stream = streams.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = kanal::unbounded();
            LoopbackStream { tx, rx }
        });
        (stream.tx.clone(), stream.rx.clone())
    }

    /// Device-side sender for an output stream: messages sent here arrive
    /// on the host's output queue of the same name.
    pub fn device_sender(&self, name: &str) -> StreamSender {
        let (tx, _) = self.stream_ends(name);
        StreamSender::new(name, tx)
    }

    /// Device-side receiver for an input stream: messages the host sends
    /// on its input queue of the same name arrive here.
    pub fn device_receiver(&self, name: &str) -> StreamReceiver {
        let (_, rx) = self.stream_ends(name);
        StreamReceiver::new(name, rx)
    }
}

impl Transport for LoopbackTransport {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn open_input(&self, name: &str, _max_data_size: usize) -> Result<StreamSender> {
        let (tx, _) = self.stream_ends(name);
        Ok(StreamSender::new(name, tx))
    }

    fn open_output(&self, name: &str) -> Result<StreamReceiver> {
        let (_, rx) = self.stream_ends(name);
        Ok(StreamReceiver::new(name, rx))
    }

    fn close(&self) {
        let streams = self.streams.lock().unwrap();
        for stream in streams.values() {
            let _ = stream.tx.close();
            let _ = stream.rx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use bytes::Bytes;
    use std::time::Duration;

    fn make_message(seq: u64) -> Arc<Message> {
        Arc::new(Message::new(
            Datatype::ImgFrame,
            Duration::from_millis(seq),
            seq,
            Bytes::from_static(b"data"),
        ))
    }

    #[test]
    fn test_loopback_output_roundtrip() {
        let transport = LoopbackTransport::new("dev0");
        let rx = transport.open_output("preview").unwrap();
        let tx = transport.device_sender("preview");

        tx.send(make_message(1)).unwrap();
        tx.send(make_message(2)).unwrap();

        assert_eq!(rx.recv().unwrap().sequence(), 1);
        assert_eq!(rx.recv().unwrap().sequence(), 2);
    }

    #[test]
    fn test_loopback_input_roundtrip() {
        let transport = LoopbackTransport::new("dev0");
        let tx = transport.open_input("control", 1024).unwrap();
        let rx = transport.device_receiver("control");

        tx.send(make_message(5)).unwrap();
        assert_eq!(rx.recv().unwrap().sequence(), 5);
    }

    #[test]
    fn test_close_unblocks_receiver() {
        let transport = Arc::new(LoopbackTransport::new("dev0"));
        let rx = transport.open_output("preview").unwrap();

        let t = {
            let transport = Arc::clone(&transport);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                transport.close();
            })
        };

        assert!(rx.recv().is_none());
        t.join().unwrap();
    }

    #[test]
    fn test_send_after_close_fails() {
        let transport = LoopbackTransport::new("dev0");
        let tx = transport.open_input("control", 1024).unwrap();
        transport.close();
        assert!(tx.send(make_message(0)).is_err());
        assert!(tx.is_closed());
    }
}
