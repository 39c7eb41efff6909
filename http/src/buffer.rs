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

use errno::errno;
use libc::c_void;
use std::os::unix::io::RawFd;
use webserv_err::{Error, ErrorKind};

const INITIAL_BUFFER_SIZE: usize = 1024;
const SPILL_SIZE: usize = 65535;

/// Growable byte window with separate read and write cursors. The readable
/// region is [read_pos, write_pos), the writable tail is [write_pos, cap) and
/// [0, read_pos) is reclaimable by compaction. read_pos <= write_pos <= cap
/// holds at all times.
pub struct Buffer {
	data: Vec<u8>,
	read_pos: usize,
	write_pos: usize,
}

impl Buffer {
	pub fn new() -> Self {
		Buffer {
			data: vec![0u8; INITIAL_BUFFER_SIZE],
			read_pos: 0,
			write_pos: 0,
		}
	}

	pub fn readable_bytes(&self) -> usize {
		self.write_pos - self.read_pos
	}

	pub fn writeable_bytes(&self) -> usize {
		self.data.len() - self.write_pos
	}

	pub fn prependable_bytes(&self) -> usize {
		self.read_pos
	}

	pub fn capacity(&self) -> usize {
		self.data.len()
	}

	/// The readable region.
	pub fn as_slice(&self) -> &[u8] {
		&self.data[self.read_pos..self.write_pos]
	}

	pub fn append(&mut self, bytes: &[u8]) {
		self.ensure_writeable(bytes.len());
		self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
		self.write_pos += bytes.len();
	}

	/// Make room for `len` more bytes: compact the reclaimable prefix if the
	/// total free space suffices, otherwise reallocate.
	pub fn ensure_writeable(&mut self, len: usize) {
		if self.writeable_bytes() >= len {
			return;
		}
		if self.writeable_bytes() + self.prependable_bytes() < len {
			self.data.resize(self.write_pos + len + 1, 0);
		} else {
			let readable = self.readable_bytes();
			self.data.copy_within(self.read_pos..self.write_pos, 0);
			self.read_pos = 0;
			self.write_pos = readable;
		}
	}

	/// Consume up to `len` readable bytes.
	pub fn retrieve(&mut self, len: usize) {
		let len = std::cmp::min(len, self.readable_bytes());
		self.read_pos += len;
	}

	pub fn retrieve_all(&mut self) {
		self.read_pos = 0;
		self.write_pos = 0;
	}

	pub fn retrieve_all_to_string(&mut self) -> String {
		let s = String::from_utf8_lossy(self.as_slice()).into_owned();
		self.retrieve_all();
		s
	}

	/// Read from `fd` in a single scatter read into the free tail plus a
	/// bounded stack spill region. If the kernel delivered more than the free
	/// tail holds, the buffer is grown and the spilled bytes appended. Ok(0)
	/// signals orderly peer shutdown; would-block surfaces as
	/// [`ErrorKind::WouldBlock`].
	pub fn read_fd(&mut self, fd: RawFd) -> Result<usize, Error> {
		let mut spill = [0u8; SPILL_SIZE];
		let writeable = self.writeable_bytes();

		let iov = [
			libc::iovec {
				iov_base: self.data[self.write_pos..].as_mut_ptr() as *mut c_void,
				iov_len: writeable,
			},
			libc::iovec {
				iov_base: spill.as_mut_ptr() as *mut c_void,
				iov_len: SPILL_SIZE,
			},
		];

		let len = unsafe { libc::readv(fd, iov.as_ptr(), 2) };
		if len < 0 {
			let e = errno();
			if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
				return Err(ErrorKind::WouldBlock.into());
			}
			return Err(ErrorKind::IOError(format!("readv failed: {}", e)).into());
		}
		let len = len as usize;
		if len <= writeable {
			self.write_pos += len;
		} else {
			self.write_pos = self.data.len();
			self.append(&spill[0..len - writeable]);
		}
		Ok(len)
	}

	/// Write the entire readable region to `fd` in one attempt and advance
	/// the read cursor by the number of bytes the kernel accepted.
	pub fn write_fd(&mut self, fd: RawFd) -> Result<usize, Error> {
		let readable = self.readable_bytes();
		let len = unsafe {
			libc::write(
				fd,
				self.data[self.read_pos..].as_ptr() as *const c_void,
				readable,
			)
		};
		if len < 0 {
			let e = errno();
			if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
				return Err(ErrorKind::WouldBlock.into());
			}
			return Err(ErrorKind::IOError(format!("write failed: {}", e)).into());
		}
		let len = len as usize;
		self.read_pos += len;
		Ok(len)
	}
}

impl Default for Buffer {
	fn default() -> Self {
		Buffer::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use nix::fcntl::{fcntl, FcntlArg, OFlag};
	use nix::unistd::{close, pipe, write};

	#[test]
	fn test_regions_partition_capacity() {
		let mut buffer = Buffer::new();
		assert_eq!(
			buffer.readable_bytes() + buffer.prependable_bytes() + buffer.writeable_bytes(),
			buffer.capacity()
		);
		buffer.append(b"hello world");
		buffer.retrieve(6);
		assert_eq!(
			buffer.readable_bytes() + buffer.prependable_bytes() + buffer.writeable_bytes(),
			buffer.capacity()
		);
		assert_eq!(buffer.as_slice(), b"world");
	}

	#[test]
	fn test_append_retrieve_round_trip() {
		let mut buffer = Buffer::new();
		buffer.append(b"abc");
		buffer.append(b"def");
		assert_eq!(buffer.readable_bytes(), 6);
		assert_eq!(buffer.retrieve_all_to_string(), "abcdef");
		assert_eq!(buffer.readable_bytes(), 0);
		assert_eq!(buffer.prependable_bytes(), 0);
	}

	#[test]
	fn test_growth_compacts_before_reallocating() {
		let mut buffer = Buffer::new();
		let cap = buffer.capacity();
		buffer.append(&vec![b'x'; cap - 10]);
		buffer.retrieve(cap - 20);
		// 10 readable, free space at the front suffices, no reallocation
		buffer.append(&vec![b'y'; cap - 30]);
		assert_eq!(buffer.capacity(), cap);
		assert_eq!(buffer.readable_bytes(), 10 + cap - 30);

		// more than compaction can satisfy forces a reallocation
		let cap = buffer.capacity();
		buffer.append(&vec![b'z'; cap * 2]);
		assert!(buffer.capacity() > cap);
	}

	#[test]
	fn test_read_fd_spill_growth() -> Result<(), Error> {
		let (rfd, wfd) = pipe()?;
		let payload = vec![b'a'; 5000];
		write(wfd, &payload)?;

		let mut buffer = Buffer::new();
		// initial capacity is 1024 so most of the payload lands in the spill
		let len = buffer.read_fd(rfd)?;
		assert_eq!(len, 5000);
		assert_eq!(buffer.as_slice(), &payload[..]);

		close(rfd)?;
		close(wfd)?;
		Ok(())
	}

	#[test]
	fn test_read_fd_would_block_and_shutdown() -> Result<(), Error> {
		let (rfd, wfd) = pipe()?;
		let flags = OFlag::from_bits_truncate(fcntl(rfd, FcntlArg::F_GETFL)?);
		fcntl(rfd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

		let mut buffer = Buffer::new();
		match buffer.read_fd(rfd) {
			Err(e) => assert_eq!(e.kind(), ErrorKind::WouldBlock),
			Ok(_) => panic!("expected would block"),
		}

		write(wfd, b"bye")?;
		close(wfd)?;
		assert_eq!(buffer.read_fd(rfd)?, 3);
		// writer gone, zero byte read signals peer shutdown
		assert_eq!(buffer.read_fd(rfd)?, 0);
		close(rfd)?;
		Ok(())
	}

	#[test]
	fn test_write_fd() -> Result<(), Error> {
		let (rfd, wfd) = pipe()?;
		let mut buffer = Buffer::new();
		buffer.append(b"response bytes");
		let len = buffer.write_fd(wfd)?;
		assert_eq!(len, 14);
		assert_eq!(buffer.readable_bytes(), 0);

		let mut incoming = Buffer::new();
		assert_eq!(incoming.read_fd(rfd)?, 14);
		assert_eq!(incoming.retrieve_all_to_string(), "response bytes");
		close(rfd)?;
		close(wfd)?;
		Ok(())
	}
}
