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

use futures::executor::block_on;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use webserv_err::{Error, ErrorKind};

/// Holder for the pinned futures that are executed by the pool.
pub struct FuturesHolder {
	inner: Pin<Box<dyn Future<Output = ()> + Send + Sync + 'static>>,
}

enum PoolMessage {
	Task(FuturesHolder),
	Stop,
}

/// A fixed size thread pool draining a single shared FIFO task queue.
///
/// Tasks are dequeued in submission order. Tasks may run concurrently on
/// different workers; the pool itself makes no per-task exclusion guarantee.
/// [`StaticThreadPool::stop`] refuses new tasks, lets the queue drain and
/// joins every worker before returning.
pub struct StaticThreadPool {
	tx: Arc<Mutex<mpsc::Sender<PoolMessage>>>,
	rx: Arc<Mutex<mpsc::Receiver<PoolMessage>>>,
	workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
	stopped: Arc<Mutex<bool>>,
	size: Arc<Mutex<usize>>,
}

impl StaticThreadPool {
	pub fn new() -> Result<Self, Error> {
		let (tx, rx): (mpsc::Sender<PoolMessage>, mpsc::Receiver<PoolMessage>) = mpsc::channel();
		Ok(StaticThreadPool {
			tx: Arc::new(Mutex::new(tx)),
			rx: Arc::new(Mutex::new(rx)),
			workers: Arc::new(Mutex::new(vec![])),
			stopped: Arc::new(Mutex::new(false)),
			size: Arc::new(Mutex::new(0)),
		})
	}

	/// Start `size` worker threads.
	pub fn start(&self, size: usize) -> Result<(), Error> {
		if size == 0 {
			return Err(
				ErrorKind::SetupError("thread pool size must be at least 1".to_string()).into(),
			);
		}
		let mut workers = lock!(self.workers);
		for _ in 0..size {
			let rx = self.rx.clone();
			workers.push(thread::spawn(move || loop {
				let message = {
					let rx = match rx.lock() {
						Ok(rx) => rx,
						Err(_) => break,
					};
					match (*rx).recv() {
						Ok(message) => message,
						Err(_) => break,
					}
				};

				match message {
					PoolMessage::Task(task) => block_on(task.inner),
					PoolMessage::Stop => break,
				}
			}));
		}
		let mut cur = lock!(self.size);
		*cur += size;
		Ok(())
	}

	/// Submit a task to the pool. Exactly one idle worker picks it up. Fails
	/// without enqueueing if the pool has been stopped.
	pub fn execute<F>(&self, f: F) -> Result<(), Error>
	where
		F: Future<Output = ()> + Send + Sync + 'static,
	{
		{
			let stopped = lock!(self.stopped);
			if *stopped {
				return Err(
					ErrorKind::SendError("thread pool has been stopped".to_string()).into(),
				);
			}
		}
		let f = FuturesHolder { inner: Box::pin(f) };
		let tx = lock!(self.tx);
		tx.send(PoolMessage::Task(f))?;
		Ok(())
	}

	/// Stop the pool. New tasks are refused, the stop markers queue up behind
	/// every pending task so the queue drains, and all workers are joined
	/// before this function returns.
	pub fn stop(&self) -> Result<(), Error> {
		{
			let mut stopped = lock!(self.stopped);
			if *stopped {
				return Ok(());
			}
			*stopped = true;
		}

		let size = {
			let size = lock!(self.size);
			*size
		};
		{
			let tx = lock!(self.tx);
			for _ in 0..size {
				tx.send(PoolMessage::Stop)?;
			}
		}

		let workers = {
			let mut workers = lock!(self.workers);
			workers.drain(..).collect::<Vec<_>>()
		};
		for worker in workers {
			let _ = worker.join();
		}
		Ok(())
	}
}
