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

use crate::buffer::Buffer;
use crate::request::{HttpRequest, ParseState, ParseStatus};
use crate::response::HttpResponse;
use errno::errno;
use libc::c_void;
use std::os::unix::io::RawFd;
use webserv_err::{Error, ErrorKind};

// drain bound for a level triggered write pass
const WRITE_DRAIN_BYTES: usize = 10240;

/// What the connection needs next after a processing step.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
	NeedRead,
	NeedWrite,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
	/// The header and body are fully flushed.
	Done,
	/// The socket stopped accepting bytes; re-arm for write readiness.
	Partial,
}

/// One client connection. Owns the socket, both buffers, the parser and the
/// response state. Exactly one worker task may act on a connection at a
/// time; the server enforces this with oneshot registrations.
pub struct HttpConn {
	fd: RawFd,
	peer: String,
	root_dir: String,
	is_et: bool,
	closed: bool,
	read_buffer: Buffer,
	write_buffer: Buffer,
	request: HttpRequest,
	response: HttpResponse,
	// bytes of the mapped file already written, survives partial writes
	file_offset: usize,
}

impl HttpConn {
	pub fn new(fd: RawFd, peer: String, root_dir: String, is_et: bool) -> Self {
		HttpConn {
			fd,
			peer,
			root_dir,
			is_et,
			closed: false,
			read_buffer: Buffer::new(),
			write_buffer: Buffer::new(),
			request: HttpRequest::new(),
			response: HttpResponse::new(),
			file_offset: 0,
		}
	}

	pub fn fd(&self) -> RawFd {
		self.fd
	}

	pub fn peer(&self) -> &str {
		&self.peer
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	pub fn is_keep_alive(&self) -> bool {
		self.request.is_keep_alive()
	}

	/// Unflushed response bytes, header segment plus mapped file remainder.
	pub fn pending_bytes(&self) -> usize {
		let file_remaining = self
			.response
			.file()
			.map(|f| f.len() - self.file_offset)
			.unwrap_or(0);
		self.write_buffer.readable_bytes() + file_remaining
	}

	/// Drain the socket into the read buffer. Edge triggered sockets are
	/// read until would-block; level triggered ones get a single attempt. A
	/// zero byte read means the peer shut down and surfaces as
	/// [`ErrorKind::ConnectionClosed`].
	pub fn read(&mut self) -> Result<usize, Error> {
		let mut total = 0;
		loop {
			match self.read_buffer.read_fd(self.fd) {
				Ok(0) => {
					return Err(ErrorKind::ConnectionClosed(format!(
						"peer closed: {}",
						self.peer
					))
					.into());
				}
				Ok(len) => {
					total += len;
					if !self.is_et {
						break;
					}
				}
				Err(e) => match e.kind() {
					ErrorKind::WouldBlock => break,
					_ => return Err(e),
				},
			}
		}
		Ok(total)
	}

	/// Feed buffered bytes to the parser. An incomplete request asks for
	/// more reads; a complete or malformed one builds the response and asks
	/// for write readiness. Malformed requests get a 400 and never keep the
	/// connection alive.
	pub fn process(&mut self) -> ProcessOutcome {
		if self.request.state() == ParseState::Finish {
			self.request.init();
		}
		if self.read_buffer.readable_bytes() == 0 {
			return ProcessOutcome::NeedRead;
		}

		match self.request.parse(&mut self.read_buffer) {
			ParseStatus::Again => return ProcessOutcome::NeedRead,
			ParseStatus::Complete => {
				self.response.init(
					&self.root_dir,
					self.request.path().to_string(),
					self.request.is_keep_alive(),
					None,
				);
			}
			ParseStatus::BadRequest => {
				self.response
					.init(&self.root_dir, self.request.path().to_string(), false, Some(400));
			}
		}

		self.write_buffer.retrieve_all();
		self.file_offset = 0;
		self.response.build(&mut self.write_buffer);
		ProcessOutcome::NeedWrite
	}

	/// Scatter-write the header segment and the mapped file segment. Edge
	/// triggered connections keep writing until done or would-block; level
	/// triggered ones keep going only while a large payload remains.
	pub fn write(&mut self) -> Result<WriteOutcome, Error> {
		loop {
			let header = self.write_buffer.as_slice();
			let header_len = header.len();
			let file = self
				.response
				.file()
				.map(|f| &f.as_slice()[self.file_offset..])
				.unwrap_or(&[]);

			let iov = [
				libc::iovec {
					iov_base: header.as_ptr() as *mut c_void,
					iov_len: header_len,
				},
				libc::iovec {
					iov_base: file.as_ptr() as *mut c_void,
					iov_len: file.len(),
				},
			];
			let iov_count = if file.is_empty() { 1 } else { 2 };

			let len = unsafe { libc::writev(self.fd, iov.as_ptr(), iov_count) };
			if len < 0 {
				let e = errno();
				if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
					return Ok(WriteOutcome::Partial);
				}
				return Err(ErrorKind::IOError(format!(
					"writev failed: {}, peer={}",
					e, self.peer
				))
				.into());
			}
			let len = len as usize;

			let header_written = std::cmp::min(len, header_len);
			self.write_buffer.retrieve(header_written);
			self.file_offset += len - header_written;

			if self.pending_bytes() == 0 {
				return Ok(WriteOutcome::Done);
			}
			if len == 0 {
				// the kernel accepted nothing, wait for readiness
				return Ok(WriteOutcome::Partial);
			}
			if !self.is_et && self.pending_bytes() <= WRITE_DRAIN_BYTES {
				return Ok(WriteOutcome::Partial);
			}
		}
	}

	/// Close the socket and release the file mapping. Safe to call more than
	/// once; later calls are no-ops.
	pub fn close(&mut self) {
		if !self.closed {
			self.closed = true;
			self.response.release();
			unsafe {
				libc::close(self.fd);
			}
		}
	}
}

impl Drop for HttpConn {
	fn drop(&mut self) {
		self.close();
	}
}
