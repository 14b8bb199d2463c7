//! A mock, useful to test device acquisition without the actual serial ports.
//!
//! A [`MockTransport`] lists [`MockDevice`]s under port paths.
//! Opening a path spawns a driver task for the device, just like opening a real port.
//! Devices can be told what to answer, what to say on their own and when to fail.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Instant,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, info_span, trace, Instrument};

use crate::{
    serial::{error::PortError, line_lossy, SerialMessageBytes},
    transport::{Port, PortCandidate, PortEvent, PortHandle, PortRequest, EVENT_CAPACITY},
};

/// Something a mock device does on its own.
#[derive(Debug, Clone)]
enum Step {
    Line(String),
    Error(String),
    Unplug,
}

/// A write a mock device received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    /// When the write happened.
    pub at: Instant,

    /// What was written.
    pub bytes: SerialMessageBytes,
}

#[derive(Debug)]
struct Live {
    steps: mpsc::UnboundedSender<Step>,
    handle: PortHandle,
}

#[derive(Debug, Default)]
struct DeviceState {
    replies: Vec<(String, String)>,
    script: Vec<(Duration, Step)>,
    repeating: Option<(Duration, Vec<String>)>,
    fail_open: bool,
    fail_writes: bool,

    writes: Vec<MockWrite>,
    opened_at: Vec<Instant>,
    live: Option<Live>,
}

/// An in-memory device.
///
/// Clones refer to the same device,
/// so a test may keep one to inspect or poke the device
/// while the transport hands it out to others.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    inner: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// A device which stays silent.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer with a line when exactly this is written.
    /// Surrounding whitespace of the write is ignored.
    pub fn reply_to(self, stimulus: &str, reply: &str) -> Self {
        self.state().replies.push((stimulus.into(), reply.into()));
        self
    }

    /// Emit a line this long after each open.
    pub fn emit_after(self, delay: Duration, line: &str) -> Self {
        self.state().script.push((delay, Step::Line(line.into())));
        self
    }

    /// Report an error this long after each open.
    /// The port stays open.
    pub fn error_after(self, delay: Duration, problem: &str) -> Self {
        self.state().script.push((delay, Step::Error(problem.into())));
        self
    }

    /// Go away this long after each open.
    pub fn unplug_after(self, delay: Duration) -> Self {
        self.state().script.push((delay, Step::Unplug));
        self
    }

    /// After any scripted steps, emit these lines in a cycle,
    /// one per period.
    pub fn stream_every<S: AsRef<str>>(self, period: Duration, lines: &[S]) -> Self {
        self.state().repeating = Some((
            period,
            lines.iter().map(|line| line.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Refuse to be opened.
    pub fn failing_open(self) -> Self {
        self.state().fail_open = true;
        self
    }

    /// Fail (or stop failing) all writes from now on.
    pub fn set_failing_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Emit a line on the currently open port, if any.
    pub fn emit(&self, line: &str) {
        self.send_step(Step::Line(line.into()));
    }

    /// Disconnect the currently open port, if any.
    pub fn unplug(&self) {
        self.send_step(Step::Unplug);
    }

    fn send_step(&self, step: Step) {
        if let Some(live) = &self.state().live {
            if live.steps.send(step).is_err() {
                debug!("Device not open, step dropped");
            }
        }
    }

    /// All writes received so far, over all opens.
    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    /// All writes received so far, as text.
    pub fn written(&self) -> Vec<String> {
        self.state()
            .writes
            .iter()
            .map(|write| line_lossy(&write.bytes))
            .collect()
    }

    /// How many times the device was opened.
    pub fn open_count(&self) -> usize {
        self.state().opened_at.len()
    }

    /// When the device was opened.
    pub fn opened_at(&self) -> Vec<Instant> {
        self.state().opened_at.clone()
    }

    /// Whether the device is currently open.
    pub fn is_open(&self) -> bool {
        self.state()
            .live
            .as_ref()
            .map(|live| live.handle.is_open())
            .unwrap_or(false)
    }

    /// A handle to the most recent open of this device.
    pub fn last_handle(&self) -> Option<PortHandle> {
        self.state().live.as_ref().map(|live| live.handle.clone())
    }

    /// Record a write and find out how the device responds to it.
    fn on_write(&self, bytes: &[u8]) -> (Result<(), PortError>, Option<String>) {
        let mut state = self.state();

        state.writes.push(MockWrite {
            at: Instant::now(),
            bytes: bytes.to_vec(),
        });

        if state.fail_writes {
            return (
                Err(PortError::IO(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "Mock write failure",
                ))),
                None,
            );
        }

        let written = line_lossy(bytes);
        let reply = state
            .replies
            .iter()
            .find(|(stimulus, _)| stimulus == written.trim())
            .map(|(_, reply)| reply.clone());

        (Ok(()), reply)
    }

    fn open(&self, path: &str) -> Result<Port, PortError> {
        let mut state = self.state();

        if state.fail_open {
            return Err(PortError::Open {
                path: path.into(),
                problem: "Mock refuses to open".into(),
            });
        }

        if state.live.as_ref().map(|live| live.handle.is_open()) == Some(true) {
            return Err(PortError::Open {
                path: path.into(),
                problem: "Device or resource busy".into(),
            });
        }

        let opened = Instant::now();
        state.opened_at.push(opened);

        let (requests_sender, requests_receiver) = mpsc::unbounded_channel();
        let (steps_sender, steps_receiver) = mpsc::unbounded_channel();
        let (broadcast_sender, broadcast_receiver) = broadcast::channel(EVENT_CAPACITY);

        let handle = PortHandle::new(path, requests_sender);

        state.live = Some(Live {
            steps: steps_sender.clone(),
            handle: handle.clone(),
        });

        let mut script = state.script.clone();
        script.sort_by_key(|(delay, _)| *delay);
        let repeating = state.repeating.clone();

        drop(state);

        let span = info_span!("mock", %path);

        tokio::spawn(
            run_script(opened, script, repeating, steps_sender).instrument(span.clone()),
        );
        tokio::spawn(
            run_device(
                self.clone(),
                requests_receiver,
                steps_receiver,
                broadcast_sender,
            )
            .instrument(span),
        );

        Ok(Port {
            handle,
            events: broadcast_receiver,
        })
    }
}

async fn run_script(
    opened: Instant,
    script: Vec<(Duration, Step)>,
    repeating: Option<(Duration, Vec<String>)>,
    steps: mpsc::UnboundedSender<Step>,
) {
    for (delay, step) in script {
        tokio::select! {
            _ = steps.closed() => return,
            _ = tokio::time::sleep_until(opened + delay) => {}
        }

        if steps.send(step).is_err() {
            return;
        }
    }

    let Some((period, lines)) = repeating else { return };
    if lines.is_empty() {
        return;
    }

    let mut interval = tokio::time::interval(period);

    for line in lines.iter().cycle() {
        tokio::select! {
            _ = steps.closed() => return,
            _ = interval.tick() => {}
        }

        if steps.send(Step::Line(line.clone())).is_err() {
            return;
        }
    }
}

async fn run_device(
    device: MockDevice,
    requests: mpsc::UnboundedReceiver<PortRequest>,
    steps: mpsc::UnboundedReceiver<Step>,
    broadcast_sender: broadcast::Sender<PortEvent>,
) {
    info!("Running mock");

    enum Event {
        Request(PortRequest),
        Step(Step),
    }

    let requests = UnboundedReceiverStream::new(requests).map(Event::Request);
    let steps = UnboundedReceiverStream::new(steps).map(Event::Step);

    let mut events = futures::stream::select(requests, steps);
    let mut close_requested: Option<oneshot::Sender<()>> = None;

    while let Some(event) = events.next().await {
        match event {
            Event::Request(PortRequest::Write { bytes, done }) => {
                let (result, reply) = device.on_write(&bytes);
                let _ = done.send(result);

                if let Some(reply) = reply {
                    trace!(%reply, "Replying");
                    let _ = broadcast_sender.send(PortEvent::Line(reply));
                }
            }
            Event::Request(PortRequest::Close { done }) => {
                close_requested = Some(done);
                break;
            }
            Event::Step(Step::Line(line)) => {
                let _ = broadcast_sender.send(PortEvent::Line(line));
            }
            Event::Step(Step::Error(problem)) => {
                let _ = broadcast_sender.send(PortEvent::Error(problem));
            }
            Event::Step(Step::Unplug) => {
                info!("Unplugged");
                break;
            }
        }
    }

    drop(events);
    let _ = broadcast_sender.send(PortEvent::Closed);
    debug!("Mock closed");

    if let Some(done) = close_requested {
        let _ = done.send(());
    }
}

/// Ports made of [`MockDevice`]s.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    devices: Arc<Mutex<Vec<(String, MockDevice)>>>,
    fail_listing: Arc<Mutex<bool>>,
}

impl MockTransport {
    /// A transport with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay on `/dev/ttyUSB0` and a GPS receiver on `/dev/ttyACM0`,
    /// with a silent device on `/dev/ttyUSB1` in between.
    pub fn with_demo_devices() -> Self {
        let transport = Self::new();

        transport.add("/dev/ttyUSB1", MockDevice::new());
        transport.add("/dev/ttyUSB0", MockDevice::new().reply_to("AT", "OK"));
        transport.add(
            "/dev/ttyACM0",
            MockDevice::new().stream_every(
                Duration::from_millis(500),
                &[
                    "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
                    "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A",
                ],
            ),
        );

        transport
    }

    fn devices(&self) -> MutexGuard<'_, Vec<(String, MockDevice)>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List a device under the given path.
    pub fn add(&self, path: &str, device: MockDevice) {
        self.devices().push((path.into(), device));
    }

    /// Stop listing devices under the given path.
    pub fn remove(&self, path: &str) {
        self.devices().retain(|(listed, _)| listed != path);
    }

    /// Make listing ports fail (or work again).
    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub(crate) fn listing(&self) -> Result<Vec<PortCandidate>, PortError> {
        if *self.fail_listing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(PortError::IO(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Mock listing failure",
            )));
        }

        Ok(self
            .devices()
            .iter()
            .map(|(path, _)| PortCandidate::new(path))
            .collect())
    }

    pub(crate) fn open_device(&self, path: &str) -> Result<Port, PortError> {
        let device = self
            .devices()
            .iter()
            .find(|(listed, _)| listed == path)
            .map(|(_, device)| device.clone());

        match device {
            Some(device) => device.open(path),
            None => Err(PortError::Open {
                path: path.into(),
                problem: "No such file or directory".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::Transport;

    async fn next_line(events: &mut broadcast::Receiver<PortEvent>) -> String {
        match events.recv().await.unwrap() {
            PortEvent::Line(line) => line,
            other => panic!("Expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replies_to_stimulus() {
        let transport = MockTransport::new();
        let device = MockDevice::new().reply_to("AT", "OK");
        transport.add("/dev/ttyUSB0", device.clone());

        let mut port = transport.open("/dev/ttyUSB0", 9600).unwrap();
        port.handle.write("AT").await.unwrap();

        assert_eq!(next_line(&mut port.events).await, "OK");
        assert_eq!(device.written(), vec!["AT"]);
    }

    #[tokio::test]
    async fn other_writes_get_no_reply() {
        let transport = MockTransport::new();
        let device = MockDevice::new().reply_to("AT", "OK");
        transport.add("/dev/ttyUSB0", device.clone());

        let mut port = transport.open("/dev/ttyUSB0", 9600).unwrap();
        port.handle.write("ATZ").await.unwrap();

        assert!(port.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_lines_arrive_in_order() {
        let transport = MockTransport::new();
        transport.add(
            "/dev/ttyACM0",
            MockDevice::new()
                .emit_after(Duration::from_millis(200), "second")
                .emit_after(Duration::from_millis(100), "first"),
        );

        let mut port = transport.open("/dev/ttyACM0", 9600).unwrap();

        assert_eq!(next_line(&mut port.events).await, "first");
        assert_eq!(next_line(&mut port.events).await, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_cycles_lines() {
        let transport = MockTransport::new();
        transport.add(
            "/dev/ttyACM0",
            MockDevice::new().stream_every(Duration::from_secs(1), &["a", "b"]),
        );

        let mut port = transport.open("/dev/ttyACM0", 9600).unwrap();

        for expected in ["a", "b", "a", "b"] {
            assert_eq!(next_line(&mut port.events).await, expected);
        }
    }

    #[tokio::test]
    async fn close_releases_device() {
        let transport = MockTransport::new();
        let device = MockDevice::new();
        transport.add("/dev/ttyUSB0", device.clone());

        let mut port = transport.open("/dev/ttyUSB0", 9600).unwrap();
        assert!(device.is_open());

        port.handle.close().await;

        assert!(!device.is_open());
        assert!(!port.handle.is_open());
        assert_eq!(port.events.recv().await.unwrap(), PortEvent::Closed);
        assert!(matches!(
            port.handle.write("AT").await,
            Err(PortError::Closed)
        ));
    }

    #[tokio::test]
    async fn open_device_is_busy() {
        let transport = MockTransport::new();
        transport.add("/dev/ttyUSB0", MockDevice::new());

        let _port = transport.open("/dev/ttyUSB0", 9600).unwrap();

        assert!(matches!(
            transport.open("/dev/ttyUSB0", 9600),
            Err(PortError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn unplug_closes_port() {
        let transport = MockTransport::new();
        let device = MockDevice::new();
        transport.add("/dev/ttyUSB0", device.clone());

        let mut port = transport.open("/dev/ttyUSB0", 9600).unwrap();
        device.unplug();

        assert_eq!(port.events.recv().await.unwrap(), PortEvent::Closed);
        assert!(!device.is_open());

        // Can be opened again, like a device plugged back in.
        let _port = transport.open("/dev/ttyUSB0", 9600).unwrap();
        assert_eq!(device.open_count(), 2);
    }

    #[tokio::test]
    async fn failing_writes_are_reported_and_recorded() {
        let transport = MockTransport::new();
        let device = MockDevice::new();
        transport.add("/dev/ttyUSB0", device.clone());
        device.set_failing_writes(true);

        let port = transport.open("/dev/ttyUSB0", 9600).unwrap();

        assert!(matches!(
            port.handle.write("AT").await,
            Err(PortError::IO(_))
        ));
        assert_eq!(device.written(), vec!["AT"]);
    }

    #[test]
    fn unknown_path_does_not_open() {
        let transport = MockTransport::new();

        assert!(matches!(
            transport.open("/dev/ttyUSB9", 9600),
            Err(PortError::Open { .. })
        ));
    }
}
