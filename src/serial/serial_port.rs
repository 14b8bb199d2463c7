use std::pin::Pin;

use futures::{future, stream, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    serial::{codecs::lines::LinesCodec, error::PortError, line_lossy, SerialMessageBytes},
    transport::{Port, PortEvent, PortHandle, PortRequest, EVENT_CAPACITY},
};

#[derive(Debug)]
enum Event {
    PleasePutThisOnWire(PortRequest),
    ThisCameFromWire(Result<SerialMessageBytes, PortError>),
    WireEnded,
    AllHandlesDropped,
}

/// Everything a port driver reacts to, as one stream.
///
/// Each source ends with a marker event, so the driver knows which side went away.
fn driver_events<W>(
    from_wire: W,
    requests: mpsc::UnboundedReceiver<PortRequest>,
) -> Pin<Box<dyn Stream<Item = Event> + Send>>
where
    W: Stream<Item = Result<SerialMessageBytes, PortError>> + Send + 'static,
{
    let requests = UnboundedReceiverStream::new(requests)
        .map(Event::PleasePutThisOnWire)
        .chain(stream::once(future::ready(Event::AllHandlesDropped)));

    let from_wire = from_wire
        .map(Event::ThisCameFromWire)
        .chain(stream::once(future::ready(Event::WireEnded)));

    Box::pin(stream::select(from_wire, requests))
}

/// Builder for an open serial [`Port`].
#[derive(Debug)]
pub struct SerialPortBuilder {
    baud: u32,
    flow_control: serialport::FlowControl,
    path: String,
    codec: LinesCodec,
}

fn try_create_serial_port(
    baud: u32,
    flow_control: serialport::FlowControl,
    path: &str,
) -> Result<SerialStream, PortError> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| PortError::Open {
            path: path.into(),
            problem: e.to_string(),
        })
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The tty should likely be along the lines of `/dev/ttyUSBx` on unix, and `COMx` on Windows.
    pub(crate) fn new(tty: &str, baud: u32) -> Self {
        Self {
            baud,
            flow_control: serialport::FlowControl::None,
            path: tty.to_string(),
            codec: LinesCodec::default(),
        }
    }

    /// Open the port and spawn the task driving it.
    pub(crate) fn build(self) -> Result<Port, PortError> {
        info!(%self.path, %self.baud, ?self.flow_control, "Opening serial port");

        let serial_stream = try_create_serial_port(self.baud, self.flow_control, &self.path)?;

        // Sink: Send things (to serial port), stream: receive things (from serial port)
        let (mut sink, from_wire) = self.codec.framed(serial_stream).split();

        let (requests_sender, requests_receiver) = mpsc::unbounded_channel();

        // Outsiders will be getting events from this broadcast.
        let (broadcast_sender, broadcast_receiver) = broadcast::channel(EVENT_CAPACITY);

        let tty_span = info_span!("tty", %self.path);

        tokio::spawn(
            async move {
                let mut events = driver_events(from_wire, requests_receiver);
                let mut close_requested: Option<oneshot::Sender<()>> = None;

                while let Some(event) = events.next().await {
                    match event {
                        Event::PleasePutThisOnWire(PortRequest::Write { bytes, done }) => {
                            let result = sink.send(bytes).await;

                            if let Err(e) = &result {
                                error!(?e, "Serial port error in send");
                            }

                            if done.send(result).is_err() {
                                debug!("Writer went away before the write completed");
                            }
                        }
                        Event::PleasePutThisOnWire(PortRequest::Close { done }) => {
                            debug!("Close requested");
                            close_requested = Some(done);
                            break;
                        }
                        Event::ThisCameFromWire(Ok(message)) => {
                            trace!(
                                "Message from port: `{:?}`",
                                &message[..message.len().min(32)]
                            );

                            // No receivers is fine, nobody is listening right now.
                            let _ = broadcast_sender.send(PortEvent::Line(line_lossy(message)));
                        }
                        Event::ThisCameFromWire(Err(e)) => {
                            error!(?e, "Serial port error, exiting");
                            let _ = broadcast_sender.send(PortEvent::Error(e.to_string()));
                            break;
                        }
                        Event::WireEnded => {
                            warn!("Serial port stream ended, exiting");
                            break;
                        }
                        Event::AllHandlesDropped => {
                            debug!("No handles left, exiting");
                            break;
                        }
                    }
                }

                // Dropping the streams releases the port.
                drop(events);
                drop(sink);

                let _ = broadcast_sender.send(PortEvent::Closed);
                info!("Serial port closed");

                if let Some(done) = close_requested {
                    let _ = done.send(());
                }
            }
            .instrument(tty_span),
        );

        Ok(Port {
            handle: PortHandle::new(&self.path, requests_sender),
            events: broadcast_receiver,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn driver_events_end_with_both_markers() {
        let (requests_sender, requests_receiver) = mpsc::unbounded_channel();
        let from_wire = stream::iter(vec![Ok(b"OK".to_vec()), Ok(b"$GPGGA".to_vec())]);

        let events = driver_events(from_wire, requests_receiver);

        let (done, _) = oneshot::channel();
        requests_sender
            .send(PortRequest::Close { done })
            .expect("Driver events should be receiving");
        drop(requests_sender);

        let events = events.collect::<Vec<_>>().await;

        let lines = events
            .iter()
            .filter_map(|event| match event {
                Event::ThisCameFromWire(Ok(line)) => Some(line.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(lines, vec![b"OK".to_vec(), b"$GPGGA".to_vec()]);

        let wire_ended = events
            .iter()
            .position(|event| matches!(event, Event::WireEnded))
            .expect("Wire should end");
        let last_line = events
            .iter()
            .rposition(|event| matches!(event, Event::ThisCameFromWire(_)))
            .expect("Lines should arrive");
        assert!(last_line < wire_ended);

        assert_eq!(
            events
                .iter()
                .filter(|event| {
                    matches!(event, Event::PleasePutThisOnWire(PortRequest::Close { .. }))
                })
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, Event::AllHandlesDropped))
                .count(),
            1
        );
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn wire_errors_come_through() {
        let (_requests_sender, requests_receiver) = mpsc::unbounded_channel();
        let from_wire = stream::iter(vec![Err(PortError::Closed)]);

        let mut events = driver_events(from_wire, requests_receiver);

        assert!(matches!(
            events.next().await,
            Some(Event::ThisCameFromWire(Err(PortError::Closed)))
        ));
        assert!(matches!(events.next().await, Some(Event::WireEnded)));
    }
}
