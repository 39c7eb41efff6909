// Copyright 2026 The Webserv Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::connection::{HttpConn, ProcessOutcome, WriteOutcome};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{
	accept, bind, getpeername, listen, setsockopt, socket, sockopt, AddressFamily, InetAddr,
	SockAddr, SockFlag, SockType,
};
use nix::unistd::{close, write};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use webserv_err::{Error, ErrorKind};
use webserv_log::*;
use webserv_poll::{EpollEvent, EpollFlags, Poller};
use webserv_util::threadpool::StaticThreadPool;
use webserv_util::timer::TimerManager;
use webserv_util::{lock, lockr, lockw, lockwp};

debug!();

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HEADER: &str = "----------------------------------------[ webserv ]----------------------------------------";

const MAX_EVENTS: usize = 1024;
const LISTEN_BACKLOG: usize = 6;
const LINGER_SECONDS: libc::c_int = 10;
// poll wait cap so that stop requests are noticed promptly
const DEFAULT_POLL_WAIT: u64 = 1000;

const BUSY_PAYLOAD: &[u8] = b"server busy, connection limit reached\n";

type ConnMap = Arc<RwLock<HashMap<RawFd, Arc<RwLock<HttpConn>>>>>;
type TimerRef = Arc<Mutex<TimerManager>>;

/// Server configuration. Trigger mode selects edge- or level-triggered
/// behavior independently for the listening socket and the connection
/// sockets: 0 = both level, 1 = connections edge, 2 = listener edge,
/// 3 (and anything else) = both edge.
#[derive(Clone)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	pub root_dir: String,
	pub trigger_mode: u8,
	/// Idle timeout in milliseconds; 0 disables eviction.
	pub timeout_millis: u64,
	pub linger: bool,
	pub pool_size: usize,
	pub max_connections: usize,
}

impl Default for ServerConfig {
	fn default() -> ServerConfig {
		ServerConfig {
			host: "0.0.0.0".to_string(),
			port: 1316,
			root_dir: "~/.webserv/www".to_string(),
			trigger_mode: 3,
			timeout_millis: 60000, // 1 min
			linger: false,
			pool_size: 4,
			max_connections: 65536,
		}
	}
}

/// The reactor. A single thread owns the poller, the timer heap and the
/// connection table; per-connection read/parse/write work is delegated to
/// the thread pool. Oneshot registrations guarantee at most one in-flight
/// task per connection; whoever finishes a unit of work re-arms the
/// registration with the interest the connection needs next.
pub struct HttpServer {
	pub config: ServerConfig,
	listen_event: EpollFlags,
	conn_event: EpollFlags,
	stop: Arc<RwLock<bool>>,
}

impl HttpServer {
	pub fn new(config: ServerConfig) -> Self {
		let mut config = config;
		let home_dir = std::env::var("HOME").unwrap_or_else(|_| "".to_string());
		config.root_dir = config.root_dir.replace("~", &home_dir);

		let exists = match std::fs::metadata(&config.root_dir) {
			Ok(md) => md.is_dir(),
			Err(_) => false,
		};
		if !exists {
			match Self::build_webroot(&config.root_dir) {
				Ok(_) => {}
				Err(e) => {
					error!("building webroot generated error: {}", e);
				}
			}
		}

		let (listen_event, conn_event) = Self::event_mode(config.trigger_mode);
		HttpServer {
			config,
			listen_event,
			conn_event,
			stop: Arc::new(RwLock::new(false)),
		}
	}

	/// Ask the serving loop to exit. It notices within one poll wait.
	pub fn stop(&self) -> Result<(), Error> {
		let mut stop = lockw!(self.stop);
		*stop = true;
		Ok(())
	}

	fn event_mode(trigger_mode: u8) -> (EpollFlags, EpollFlags) {
		let mut listen_event = EpollFlags::EPOLLRDHUP;
		let mut conn_event = EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLONESHOT;
		match trigger_mode {
			0 => {}
			1 => conn_event |= EpollFlags::EPOLLET,
			2 => listen_event |= EpollFlags::EPOLLET,
			_ => {
				listen_event |= EpollFlags::EPOLLET;
				conn_event |= EpollFlags::EPOLLET;
			}
		}
		(listen_event, conn_event)
	}

	/// Materialize a default webroot with an index page and the fixed error
	/// pages so a fresh install serves something.
	fn build_webroot(root_dir: &str) -> Result<(), Error> {
		std::fs::create_dir_all(root_dir)?;
		let pages: [(&str, &[u8]); 5] = [
			("index.html", include_bytes!("resources/index.html")),
			("welcome.html", include_bytes!("resources/welcome.html")),
			("400.html", include_bytes!("resources/400.html")),
			("403.html", include_bytes!("resources/403.html")),
			("404.html", include_bytes!("resources/404.html")),
		];
		for (name, bytes) in pages.iter() {
			let mut file = std::fs::File::create(format!("{}/{}", root_dir, name))?;
			file.write_all(bytes)?;
		}
		Ok(())
	}

	/// Run the serving loop. Returns only after [`HttpServer::stop`] or a
	/// fatal setup failure; setup failures are reported before any
	/// connection is accepted.
	pub fn start(&mut self) -> Result<(), Error> {
		let addr = format!("{}:{}", self.config.host, self.config.port);
		info!("webserv {}", VERSION);
		info_no_ts!("{}", HEADER);
		info!("webroot:          '{}'", self.config.root_dir);
		info!("bind address:     '{}'", addr);
		info!("trigger mode:     '{}'", self.config.trigger_mode);
		info!("idle timeout:     '{} ms'", self.config.timeout_millis);
		info!("thread pool size: '{}'", self.config.pool_size);
		info_no_ts!("{}", HEADER);

		let listen_fd = self.init_socket()?;
		let poller = Arc::new(Poller::new()?);
		if !poller.add(listen_fd, self.listen_event | EpollFlags::EPOLLIN) {
			let _ = close(listen_fd);
			return Err(ErrorKind::SetupError(
				"could not register listening socket".to_string(),
			)
			.into());
		}

		let thread_pool = StaticThreadPool::new()?;
		thread_pool.start(self.config.pool_size)?;
		let timer: TimerRef = Arc::new(Mutex::new(TimerManager::new()));
		let conns: ConnMap = Arc::new(RwLock::new(HashMap::new()));

		info!("server started on {}", addr);

		let mut events = [EpollEvent::empty(); MAX_EVENTS];
		loop {
			{
				let stop = lockr!(self.stop);
				if *stop {
					break;
				}
			}

			let timeout_ms = self.reap_timers(&timer)?;
			let count = poller.wait(&mut events, timeout_ms)?;

			for event in events.iter().take(count) {
				let fd = event.data() as RawFd;
				let evts = event.events();

				if fd == listen_fd {
					self.accept_connections(listen_fd, &poller, &conns, &timer)?;
					continue;
				}

				let conn = {
					let conns = lockr!(conns);
					conns.get(&fd).cloned()
				};
				// already evicted earlier in this batch
				let conn = match conn {
					Some(conn) => conn,
					None => continue,
				};

				if !(evts & (EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR))
					.is_empty()
				{
					Self::close_connection(fd, &conns, &poller, &timer)?;
				} else if !(evts & EpollFlags::EPOLLIN).is_empty() {
					self.extend_time(fd, &timer)?;
					self.spawn_read(&thread_pool, conn, &conns, &poller, &timer)?;
				} else if !(evts & EpollFlags::EPOLLOUT).is_empty() {
					self.extend_time(fd, &timer)?;
					self.spawn_write(&thread_pool, conn, &conns, &poller, &timer)?;
				} else {
					warn!("unexpected event mask {:?} for fd={}", evts, fd);
				}
			}
		}

		info!("server stopping");
		thread_pool.stop()?;
		poller.remove(listen_fd);
		let _ = close(listen_fd);
		let remaining = {
			let mut conns = lockw!(conns);
			conns.drain().map(|(_, conn)| conn).collect::<Vec<_>>()
		};
		for conn in remaining {
			let mut conn = lockw!(conn);
			conn.close();
		}
		{
			let mut timer = lock!(timer);
			timer.clear();
		}
		info!("server stopped");
		Ok(())
	}

	/// Fire expired eviction callbacks and return the bounded poll wait so
	/// the next eviction is never late by more than one cycle.
	fn reap_timers(&self, timer: &TimerRef) -> Result<isize, Error> {
		if self.config.timeout_millis == 0 {
			return Ok(DEFAULT_POLL_WAIT as isize);
		}
		let expired = {
			let mut timer = lock!(timer);
			timer.take_expired(Instant::now())
		};
		// fired outside the lock, the callbacks touch the connection table
		for mut callback in expired {
			callback();
		}
		let next = {
			let timer = lock!(timer);
			timer.next_deadline_ms(Instant::now())
		};
		Ok(match next {
			Some(ms) => std::cmp::min(ms, DEFAULT_POLL_WAIT) as isize,
			None => DEFAULT_POLL_WAIT as isize,
		})
	}

	fn extend_time(&self, fd: RawFd, timer: &TimerRef) -> Result<(), Error> {
		if self.config.timeout_millis > 0 {
			let mut timer = lock!(timer);
			timer.touch(fd, self.config.timeout_millis);
		}
		Ok(())
	}

	fn accept_connections(
		&self,
		listen_fd: RawFd,
		poller: &Arc<Poller>,
		conns: &ConnMap,
		timer: &TimerRef,
	) -> Result<(), Error> {
		loop {
			let fd = match accept(listen_fd) {
				Ok(fd) => fd,
				Err(e) => {
					if e.as_errno() != Some(Errno::EAGAIN) {
						info!("accept generated error: {}", e);
					}
					break;
				}
			};

			let count = {
				let conns = lockr!(conns);
				conns.len()
			};
			if count >= self.config.max_connections {
				warn!(
					"connection limit ({}) reached, rejecting fd={}",
					self.config.max_connections, fd
				);
				let _ = write(fd, BUSY_PAYLOAD);
				let _ = close(fd);
				continue;
			}

			let peer = match getpeername(fd) {
				Ok(addr) => addr.to_string(),
				Err(_) => "unknown".to_string(),
			};
			if let Err(e) = Self::set_nonblocking(fd) {
				info!("could not set fd={} non-blocking: {}", fd, e);
				let _ = close(fd);
				continue;
			}

			let is_et = !(self.conn_event & EpollFlags::EPOLLET).is_empty();
			let conn = Arc::new(RwLock::new(HttpConn::new(
				fd,
				peer.clone(),
				self.config.root_dir.clone(),
				is_et,
			)));
			{
				let mut conns = lockw!(conns);
				conns.insert(fd, conn);
			}

			if self.config.timeout_millis > 0 {
				let conns = conns.clone();
				let poller = poller.clone();
				let mut timer = lock!(timer);
				timer.schedule(
					fd,
					self.config.timeout_millis,
					Box::new(move || {
						let conn = {
							let mut conns = lockwp!(conns);
							conns.remove(&fd)
						};
						if let Some(conn) = conn {
							info!("evicting idle connection fd={}", fd);
							poller.remove(fd);
							let mut conn = lockwp!(conn);
							conn.close();
						}
					}),
				);
			}

			if !poller.add(fd, self.conn_event | EpollFlags::EPOLLIN) {
				// registration failure is fatal for this connection only
				Self::close_connection(fd, conns, poller, timer)?;
				continue;
			}
			debug!("accepted connection from {} fd={}", peer, fd);

			if (self.listen_event & EpollFlags::EPOLLET).is_empty() {
				break;
			}
		}
		Ok(())
	}

	fn spawn_read(
		&self,
		thread_pool: &StaticThreadPool,
		conn: Arc<RwLock<HttpConn>>,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
	) -> Result<(), Error> {
		let conns = conns.clone();
		let poller = poller.clone();
		let timer = timer.clone();
		let conn_event = self.conn_event;
		thread_pool.execute(async move {
			match Self::process_read(conn, &conns, &poller, &timer, conn_event) {
				Ok(_) => {}
				Err(e) => info!("read task generated error: {}", e),
			}
		})?;
		Ok(())
	}

	fn spawn_write(
		&self,
		thread_pool: &StaticThreadPool,
		conn: Arc<RwLock<HttpConn>>,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
	) -> Result<(), Error> {
		let conns = conns.clone();
		let poller = poller.clone();
		let timer = timer.clone();
		let conn_event = self.conn_event;
		thread_pool.execute(async move {
			match Self::process_write(conn, &conns, &poller, &timer, conn_event) {
				Ok(_) => {}
				Err(e) => info!("write task generated error: {}", e),
			}
		})?;
		Ok(())
	}

	/// Worker side of a read-readiness event: drain the socket, drive the
	/// parser, then re-arm with whatever interest comes next.
	fn process_read(
		conn: Arc<RwLock<HttpConn>>,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
		conn_event: EpollFlags,
	) -> Result<(), Error> {
		let mut conn = lockw!(conn);
		if conn.is_closed() {
			return Ok(());
		}
		match conn.read() {
			Ok(_) => {}
			Err(e) => match e.kind() {
				ErrorKind::WouldBlock => {}
				_ => {
					debug!("closing {}: {}", conn.peer(), e);
					return Self::close_locked(&mut conn, conns, poller, timer);
				}
			},
		}
		Self::rearm(&mut conn, conns, poller, timer, conn_event)
	}

	/// Worker side of a write-readiness event. A fully flushed keep-alive
	/// connection loops back to processing; anything else that cannot make
	/// progress is closed.
	fn process_write(
		conn: Arc<RwLock<HttpConn>>,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
		conn_event: EpollFlags,
	) -> Result<(), Error> {
		let mut conn = lockw!(conn);
		if conn.is_closed() {
			return Ok(());
		}
		match conn.write() {
			Ok(WriteOutcome::Done) => {
				if conn.is_keep_alive() {
					Self::rearm(&mut conn, conns, poller, timer, conn_event)
				} else {
					Self::close_locked(&mut conn, conns, poller, timer)
				}
			}
			Ok(WriteOutcome::Partial) => {
				if !poller.modify(conn.fd(), conn_event | EpollFlags::EPOLLOUT) {
					return Self::close_locked(&mut conn, conns, poller, timer);
				}
				Ok(())
			}
			Err(e) => {
				debug!("closing {}: {}", conn.peer(), e);
				Self::close_locked(&mut conn, conns, poller, timer)
			}
		}
	}

	fn rearm(
		conn: &mut HttpConn,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
		conn_event: EpollFlags,
	) -> Result<(), Error> {
		let interest = match conn.process() {
			ProcessOutcome::NeedRead => conn_event | EpollFlags::EPOLLIN,
			ProcessOutcome::NeedWrite => conn_event | EpollFlags::EPOLLOUT,
		};
		if !poller.modify(conn.fd(), interest) {
			return Self::close_locked(conn, conns, poller, timer);
		}
		Ok(())
	}

	/// Close path shared by hang-up events on the reactor. Converges with
	/// eviction and worker closes; whichever runs first wins and the others
	/// find the table entry gone.
	fn close_connection(
		fd: RawFd,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
	) -> Result<(), Error> {
		let conn = {
			let mut conns = lockw!(conns);
			conns.remove(&fd)
		};
		if let Some(conn) = conn {
			poller.remove(fd);
			{
				let mut timer = lock!(timer);
				timer.cancel(fd);
			}
			let mut conn = lockw!(conn);
			conn.close();
		}
		Ok(())
	}

	/// Close path for a worker already holding the connection lock.
	fn close_locked(
		conn: &mut HttpConn,
		conns: &ConnMap,
		poller: &Arc<Poller>,
		timer: &TimerRef,
	) -> Result<(), Error> {
		let fd = conn.fd();
		{
			let mut conns = lockw!(conns);
			conns.remove(&fd);
		}
		poller.remove(fd);
		{
			let mut timer = lock!(timer);
			timer.cancel(fd);
		}
		conn.close();
		Ok(())
	}

	fn init_socket(&self) -> Result<RawFd, Error> {
		if self.config.port < 1024 {
			return Err(ErrorKind::SetupError(format!(
				"invalid port {}, must be between 1024 and 65535",
				self.config.port
			))
			.into());
		}
		let listen_fd = socket(
			AddressFamily::Inet,
			SockType::Stream,
			SockFlag::empty(),
			None,
		)?;
		match self.configure_listener(listen_fd) {
			Ok(_) => Ok(listen_fd),
			Err(e) => {
				let _ = close(listen_fd);
				Err(e)
			}
		}
	}

	fn configure_listener(&self, listen_fd: RawFd) -> Result<(), Error> {
		let linger = libc::linger {
			l_onoff: if self.config.linger { 1 } else { 0 },
			l_linger: LINGER_SECONDS,
		};
		setsockopt(listen_fd, sockopt::Linger, &linger)?;
		setsockopt(listen_fd, sockopt::ReusePort, &true)?;

		let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
			.parse()
			.map_err(|_| {
				ErrorKind::SetupError(format!(
					"invalid bind address: {}:{}",
					self.config.host, self.config.port
				))
			})?;
		bind(listen_fd, &SockAddr::new_inet(InetAddr::from_std(&addr)))?;
		listen(listen_fd, LISTEN_BACKLOG)?;
		Self::set_nonblocking(listen_fd)?;
		Ok(())
	}

	fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
		let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
		fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::io::Read;
	use std::net::TcpStream;
	use std::thread;
	use std::time::Duration;

	fn temp_root(name: &str) -> String {
		let dir = std::env::temp_dir()
			.join(format!("webserv_server_{}_{}", name, rand::random::<u64>()));
		let dir = dir.display().to_string();
		fs::create_dir_all(&dir).unwrap();
		fs::write(
			format!("{}/index.html", dir),
			b"<html><body>small test page</body></html>",
		)
		.unwrap();
		fs::write(format!("{}/404.html", dir), b"<html>not found page</html>").unwrap();
		fs::write(format!("{}/400.html", dir), b"<html>bad request page</html>").unwrap();
		dir
	}

	fn connect_with_retry(port: u16) -> TcpStream {
		for _ in 0..50 {
			match TcpStream::connect(("127.0.0.1", port)) {
				Ok(stream) => return stream,
				Err(_) => thread::sleep(Duration::from_millis(100)),
			}
		}
		panic!("could not connect to 127.0.0.1:{}", port);
	}

	// read headers + body, using Content-length to know when the body ends
	fn read_full_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
		let mut data = vec![];
		let mut chunk = [0u8; 4096];
		let header_end = loop {
			let n = stream.read(&mut chunk).unwrap();
			assert!(n > 0, "connection closed before headers were complete");
			data.extend_from_slice(&chunk[0..n]);
			if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
				break pos + 4;
			}
		};
		let header = String::from_utf8_lossy(&data[0..header_end]).into_owned();
		let content_length = header
			.lines()
			.find(|l| l.starts_with("Content-length: "))
			.and_then(|l| l["Content-length: ".len()..].trim().parse::<usize>().ok())
			.unwrap();
		while data.len() < header_end + content_length {
			let n = stream.read(&mut chunk).unwrap();
			assert!(n > 0, "connection closed before the body was complete");
			data.extend_from_slice(&chunk[0..n]);
		}
		(header, data[header_end..header_end + content_length].to_vec())
	}

	#[test]
	fn test_end_to_end_get_and_idle_eviction() -> Result<(), Error> {
		let root = temp_root("e2e");
		let port = portpicker::pick_unused_port().unwrap();
		let config = ServerConfig {
			port,
			host: "127.0.0.1".to_string(),
			root_dir: root.clone(),
			timeout_millis: 1500,
			pool_size: 2,
			..Default::default()
		};
		let mut server = HttpServer::new(config);
		let stop = server.stop.clone();
		let handle = thread::spawn(move || {
			let _ = server.start();
		});

		let mut stream = connect_with_retry(port);
		std::io::Write::write_all(
			&mut stream,
			b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
		)?;

		let expected = fs::read(format!("{}/index.html", root))?;
		let (header, body) = read_full_response(&mut stream);
		assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
		assert!(header.contains("Connection: keep-alive\r\n"));
		assert!(header.contains(&format!("Content-length: {}\r\n", expected.len())));
		assert_eq!(body, expected);

		// stay idle past the timeout, the server must close the connection
		stream.set_read_timeout(Some(Duration::from_secs(10)))?;
		let mut tail = [0u8; 64];
		let n = stream.read(&mut tail)?;
		assert_eq!(n, 0);

		{
			let mut stop = lockw!(stop);
			*stop = true;
		}
		let _ = handle.join();
		fs::remove_dir_all(&root).unwrap();
		Ok(())
	}

	#[test]
	fn test_missing_file_gets_404_page() -> Result<(), Error> {
		let root = temp_root("missing");
		let port = portpicker::pick_unused_port().unwrap();
		let config = ServerConfig {
			port,
			host: "127.0.0.1".to_string(),
			root_dir: root.clone(),
			timeout_millis: 60000,
			pool_size: 2,
			..Default::default()
		};
		let mut server = HttpServer::new(config);
		let stop = server.stop.clone();
		let handle = thread::spawn(move || {
			let _ = server.start();
		});

		let mut stream = connect_with_retry(port);
		// no keep-alive, the server closes after responding
		std::io::Write::write_all(&mut stream, b"GET /missing HTTP/1.1\r\n\r\n")?;

		let mut data = vec![];
		stream.set_read_timeout(Some(Duration::from_secs(10)))?;
		stream.read_to_end(&mut data)?;
		let response = String::from_utf8_lossy(&data).into_owned();
		assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
		assert!(response.contains("Connection: close\r\n"));
		assert!(response.ends_with("<html>not found page</html>"));

		{
			let mut stop = lockw!(stop);
			*stop = true;
		}
		let _ = handle.join();
		fs::remove_dir_all(&root).unwrap();
		Ok(())
	}

	#[test]
	fn test_invalid_port_fails_setup() {
		let root = temp_root("setup");
		let config = ServerConfig {
			port: 1023,
			root_dir: root.clone(),
			..Default::default()
		};
		let mut server = HttpServer::new(config);
		assert!(server.start().is_err());
		fs::remove_dir_all(&root).unwrap();
	}
}
