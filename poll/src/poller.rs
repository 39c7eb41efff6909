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

use nix::errno::Errno;
use nix::sys::epoll::{
	epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
};
use nix::unistd::close;
use std::os::unix::io::RawFd;
use webserv_err::Error;
use webserv_log::*;

debug!();

/// Thin wrapper around an epoll instance. The fd being watched is stored in
/// the event payload, so harvested events map straight back to a connection.
pub struct Poller {
	epfd: RawFd,
}

impl Poller {
	pub fn new() -> Result<Self, Error> {
		let epfd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;
		Ok(Poller { epfd })
	}

	/// Register `fd` with the given interest set. Control failures are logged
	/// and reported as false rather than propagated; the caller decides
	/// whether the connection survives.
	pub fn add(&self, fd: RawFd, interest: EpollFlags) -> bool {
		let mut event = EpollEvent::new(interest, fd as u64);
		match epoll_ctl(self.epfd, EpollOp::EpollCtlAdd, fd, &mut event) {
			Ok(_) => true,
			Err(e) => {
				info!("Error epoll_ctl (add): {}, fd={}", e, fd);
				false
			}
		}
	}

	/// Replace the interest set for an already registered `fd`. Re-arming a
	/// oneshot registration goes through here.
	pub fn modify(&self, fd: RawFd, interest: EpollFlags) -> bool {
		let mut event = EpollEvent::new(interest, fd as u64);
		match epoll_ctl(self.epfd, EpollOp::EpollCtlMod, fd, &mut event) {
			Ok(_) => true,
			Err(e) => {
				info!("Error epoll_ctl (mod): {}, fd={}", e, fd);
				false
			}
		}
	}

	pub fn remove(&self, fd: RawFd) -> bool {
		match epoll_ctl(self.epfd, EpollOp::EpollCtlDel, fd, None::<&mut EpollEvent>) {
			Ok(_) => true,
			Err(e) => {
				info!("Error epoll_ctl (del): {}, fd={}", e, fd);
				false
			}
		}
	}

	/// Harvest ready events into `events`, blocking for at most `timeout_ms`
	/// milliseconds (-1 blocks indefinitely). EINTR is not an error; it is
	/// reported as zero events so the caller loops back and re-checks timers.
	pub fn wait(&self, events: &mut [EpollEvent], timeout_ms: isize) -> Result<usize, Error> {
		match epoll_wait(self.epfd, events, timeout_ms) {
			Ok(count) => Ok(count),
			Err(e) => {
				if e.as_errno() == Some(Errno::EINTR) {
					Ok(0)
				} else {
					Err(e.into())
				}
			}
		}
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		let _ = close(self.epfd);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use nix::unistd::{pipe, write};

	#[test]
	fn test_pipe_readiness() -> Result<(), Error> {
		let poller = Poller::new()?;
		let (rfd, wfd) = pipe()?;
		assert!(poller.add(rfd, EpollFlags::EPOLLIN));

		let mut events = [EpollEvent::empty(); 16];
		let count = poller.wait(&mut events, 0)?;
		assert_eq!(count, 0);

		write(wfd, b"x")?;
		let count = poller.wait(&mut events, 1000)?;
		assert_eq!(count, 1);
		assert_eq!(events[0].data(), rfd as u64);
		assert!(!(events[0].events() & EpollFlags::EPOLLIN).is_empty());

		assert!(poller.remove(rfd));
		let count = poller.wait(&mut events, 0)?;
		assert_eq!(count, 0);

		close(rfd)?;
		close(wfd)?;
		Ok(())
	}

	#[test]
	fn test_oneshot_fires_until_rearmed() -> Result<(), Error> {
		let poller = Poller::new()?;
		let (rfd, wfd) = pipe()?;
		assert!(poller.add(rfd, EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT));

		write(wfd, b"x")?;
		let mut events = [EpollEvent::empty(); 16];
		let count = poller.wait(&mut events, 1000)?;
		assert_eq!(count, 1);

		// delivered once, the registration is disarmed until modified
		let count = poller.wait(&mut events, 0)?;
		assert_eq!(count, 0);

		assert!(poller.modify(rfd, EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT));
		let count = poller.wait(&mut events, 1000)?;
		assert_eq!(count, 1);

		// removing an fd that was never added fails and is only logged
		assert!(!poller.remove(wfd));

		close(rfd)?;
		close(wfd)?;
		Ok(())
	}
}
