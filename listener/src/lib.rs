use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::address::Address;
use crate::error::Error;
use crate::handler::Handler;
use crate::sink::Sink;

pub mod address;
pub mod error;
pub mod handler;
pub mod message;
pub mod record;
pub mod sink;

/// A `Listener` accepts TCP connections and hands each one to a `Handler` on its own thread.
///
/// Every request on every connection is written to the `Sink` as a group of three lines
/// (method, headers, body) and answered with `200 Logged`.
pub struct Listener {
    listener: TcpListener,
    address: Address,
    handler: Arc<Handler>,
}

impl Listener {
    /// Binds a `TcpListener` to `address`.
    ///
    /// Binding to port `0` picks a free port; [`address`](Self::address) reports which one.
    pub fn bind(address: Address, sink: Arc<dyn Sink>) -> Result<Listener, Error> {
        let listener =
            TcpListener::bind(SocketAddr::from(address)).map_err(|err| Error::Bind(address, err))?;
        let bound = listener
            .local_addr()
            .map_err(|err| Error::Bind(address, err))?;

        info!("[Listener::bind] bound TCP listener to {}", bound);

        Ok(Listener {
            listener,
            address: Address::from(bound),
            handler: Arc::new(Handler::new(sink)),
        })
    }

    /// The address this `Listener` is actually bound to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The line announcing where this `Listener` can be reached.
    pub fn banner(&self) -> String {
        format!("HTTP webserver running. Access it at: {}", self.address.url())
    }

    /// Accepts connections forever, serving each on a new thread.
    ///
    /// A failed `accept` or a failed connection is logged and otherwise ignored.
    pub fn run(self) -> ! {
        let mut connections: u64 = 0;

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    connections += 1;
                    let number = connections;
                    let handler = Arc::clone(&self.handler);

                    let spawned = std::thread::Builder::new()
                        .name(format!("connection-{}", number))
                        .spawn(move || Self::serve(stream, peer, number, &handler));

                    if let Err(err) = spawned {
                        warn!(
                            "[Listener::run] could not spawn a thread for connection #{}: {}",
                            number, err
                        )
                    }
                }
                Err(err) => warn!("[Listener::run] could not accept connection: {}", err),
            }
        }
    }

    /// Moves this `Listener` onto a background thread and runs it there.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn serve(stream: TcpStream, peer: SocketAddr, number: u64, handler: &Handler) {
        debug!("[Listener::serve] connection #{} accepted from {}", number, peer);

        let mut reader = BufReader::new(&stream);
        let mut writer = &stream;

        match handler.handle(&mut reader, &mut writer) {
            Ok(served) => debug!(
                "[Listener::serve] connection #{} from {} closed after {} request(s)",
                number, peer, served
            ),
            Err(err) => warn!(
                "[Listener::serve] connection #{} from {} failed: {}",
                number, peer, err
            ),
        }
    }
}
