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

//! A small logging library built around a single default logger.

use chrono::{DateTime, Local, Utc};
use lazy_static::lazy_static;
use std::fs::{canonicalize, metadata, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use webserv_err::{Error, ErrorKind};

pub const TRACE: i32 = 0;
pub const DEBUG: i32 = 1;
pub const INFO: i32 = 2;
pub const WARN: i32 = 3;
pub const ERROR: i32 = 4;
pub const FATAL: i32 = 5;

lazy_static! {
	/// This is the static holder of the default log object. Generally this
	/// should not be used directly. See [`log`] instead.
	pub static ref STATIC_LOG: Arc<Mutex<Log>> = Arc::new(Mutex::new(Log::new()));
}

/// Log at the 'trace' (0) log level. The zero argument form sets the log level
/// for the enclosing module. It is used like the println/format macros.
/// Also see [`debug`], [`info`], [`warn`], [`error`], or [`fatal`].
/// # Examples
/// ```
/// use webserv_log::*;
/// // log level must be set before calling any logging function.
/// // typically it is done at the top of a file so that it's easy to change.
/// trace!(); // set log level to trace "0"
///
/// let abc = 123;
/// trace!("my value = {}", abc);
/// ```
#[macro_export]
macro_rules! trace {
	() => {
		webserv_log::do_log!(webserv_log::TRACE);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::TRACE, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::TRACE, $a, $($b)*);
	}};
}

/// Log at the 'debug' (1) log level. See [`trace`] for usage.
#[macro_export]
macro_rules! debug {
	() => {
		webserv_log::do_log!(webserv_log::DEBUG);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::DEBUG, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::DEBUG, $a, $($b)*);
	}};
}

/// Log at the 'info' (2) log level. See [`trace`] for usage.
#[macro_export]
macro_rules! info {
	() => {
		webserv_log::do_log!(webserv_log::INFO);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::INFO, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::INFO, $a, $($b)*);
	}};
}

/// Just like [`info`], but with no timestamp.
#[macro_export]
macro_rules! info_no_ts {
	($a:expr) => {{
		webserv_log::log_no_ts!(webserv_log::INFO, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log_no_ts!(webserv_log::INFO, $a, $($b)*);
	}};
}

/// Log at the 'warn' (3) log level. See [`trace`] for usage.
#[macro_export]
macro_rules! warn {
	() => {
		webserv_log::do_log!(webserv_log::WARN);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::WARN, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::WARN, $a, $($b)*);
	}};
}

/// Log at the 'error' (4) log level. See [`trace`] for usage.
#[macro_export]
macro_rules! error {
	() => {
		webserv_log::do_log!(webserv_log::ERROR);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::ERROR, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::ERROR, $a, $($b)*);
	}};
}

/// Log at the 'fatal' (5) log level. See [`trace`] for usage.
#[macro_export]
macro_rules! fatal {
	() => {
		webserv_log::do_log!(webserv_log::FATAL);
	};
	($a:expr) => {{
		webserv_log::log!(webserv_log::FATAL, $a);
	}};
	($a:expr,$($b:tt)*)=>{{
		webserv_log::log!(webserv_log::FATAL, $a, $($b)*);
	}};
}

/// The main logging macro. The first parameter is the log level. To avoid
/// specifying level, see [`trace`], [`debug`], [`info`], [`warn`], [`error`],
/// or [`fatal`].
#[macro_export]
macro_rules! log {
	($level:expr, $a:expr)=>{{
		let static_log = &webserv_log::STATIC_LOG;
		match static_log.lock() {
			Ok(mut log) => {
				webserv_log::do_log!($level, true, log, $a);
			}
			Err(e) => {
				println!(
					"Error: could not log '{}' due to PoisonError: {}",
					format!($a),
					e.to_string()
				);
			}
		}
	}};
	($level:expr, $a:expr,$($b:tt)*)=>{{
		let static_log = &webserv_log::STATIC_LOG;
		match static_log.lock() {
			Ok(mut log) => {
				webserv_log::do_log!($level, true, log, $a, $($b)*);
			}
			Err(e) => {
				println!(
					"Error: could not log '{}' due to PoisonError: {}",
					format!($a, $($b)*),
					e.to_string()
				);
			}
		}
	}};
}

/// Log using the default logger and don't print a timestamp. See [`log`] for
/// more details on logging.
#[macro_export]
macro_rules! log_no_ts {
	($level:expr, $a:expr)=>{{
		let static_log = &webserv_log::STATIC_LOG;
		match static_log.lock() {
			Ok(mut log) => {
				webserv_log::do_log!($level, false, log, $a);
			}
			Err(e) => {
				println!(
					"Error: could not log '{}' due to PoisonError: {}",
					format!($a),
					e.to_string()
				);
			}
		}
	}};
	($level:expr, $a:expr,$($b:tt)*)=>{{
		let static_log = &webserv_log::STATIC_LOG;
		match static_log.lock() {
			Ok(mut log) => {
				webserv_log::do_log!($level, false, log, $a, $($b)*);
			}
			Err(e) => {
				println!(
					"Error: could not log '{}' due to PoisonError: {}",
					format!($a, $($b)*),
					e.to_string()
				);
			}
		}
	}};
}

/// Generally, this macro should not be used directly. It is used by the other
/// macros. See [`log`] or [`info`] instead.
#[macro_export]
macro_rules! do_log {
	($level:expr)=>{
		const LOG_LEVEL: i32 = $level;
	};
	($level:expr, $show_ts:expr, $log:expr, $a:expr)=>{{
		// if not configured, use defaults
		if !$log.is_configured() {
			let _ = $log.config_with_object(webserv_log::LogConfig::default());
		}

		let _ = $log.update_show_timestamp($show_ts);

		if $level >= LOG_LEVEL {
			match $log.log(&format!($a)) {
				Ok(_) => {}
				Err(e) => {
					println!(
						"Logging of '{}' resulted in Error: {}",
						format!($a),
						e.to_string(),
					);
				}
			}
		}

		// always set back to showing timestamp (as default)
		let _ = $log.update_show_timestamp(true);
	}};
	($level:expr, $show_ts:expr, $log:expr, $a:expr, $($b:tt)*)=>{{
		// if not configured, use defaults
		if !$log.is_configured() {
			let _ = $log.config_with_object(webserv_log::LogConfig::default());
		}

		let _ = $log.update_show_timestamp($show_ts);

		if $level >= LOG_LEVEL {
			match $log.log(&format!($a, $($b)*)) {
				Ok(_) => {}
				Err(e) => {
					println!(
						"Logging of '{}' resulted in Error: {}",
						format!($a, $($b)*),
						e.to_string(),
					);
				}
			}
		}

		let _ = $log.update_show_timestamp(true);
	}};
}

/// This macro may be used to configure logging. If it is not called, the
/// default LogConfig is used. By default logging is only done to stdout.
/// # Examples
/// ```
/// use webserv_log::*;
///
/// info!();
///
/// log_config!(webserv_log::LogConfig {
/// 	max_age_millis: 10000, // set log rotations to every 10 seconds
/// 	max_size: 10000, // set log rotations to every 10,000 bytes
/// 	..Default::default()
/// });
/// ```
/// For full details on all parameters of LogConfig see [`LogConfig`].
#[macro_export]
macro_rules! log_config {
	($a:expr) => {{
		let static_log = &webserv_log::STATIC_LOG;
		match static_log.lock() {
			Ok(mut log) => log.config_with_object($a),
			Err(e) => Err(webserv_err::ErrorKind::PoisonError(format!(
				"log generated poison error: {}",
				e
			))
			.into()),
		}
	}};
}

/// Log Config object.
pub struct LogConfig {
	/// The path to the log file. By default, logging is only printed to
	/// standard output. This default behaviour is achieved by setting
	/// file_path to an empty string.
	pub file_path: String,
	/// The maximum size in bytes of the log file before a log rotation
	/// occurs. By default, this is set to 10485760 bytes (10 mb).
	pub max_size: u64,
	/// The maximum age in milliseconds before a log rotation occurs. By
	/// default, this is set to 3600000 ms (1 hour).
	pub max_age_millis: u128,
	/// The header (first line) of a log file. By default there is no header.
	pub file_header: String,
	/// Whether or not to show the timestamp. By default, this is set to true.
	pub show_timestamp: bool,
	/// Whether or not to print the log lines to standard output. By default,
	/// this is set to true.
	pub show_stdout: bool,
}

impl Default for LogConfig {
	fn default() -> Self {
		LogConfig {
			file_path: "".to_string(),
			max_size: 1024 * 1024 * 10,
			max_age_millis: 1000 * 60 * 60,
			file_header: "".to_string(),
			show_timestamp: true,
			show_stdout: true,
		}
	}
}

/// The data that is held by the Log object
struct LogParams {
	file: Option<File>,
	cur_size: u64,
	init_age_millis: u128,
	config: LogConfig,
}

impl LogParams {
	/// This function rotates logs
	fn rotate(&mut self) -> Result<(), Error> {
		let now: DateTime<Utc> = Utc::now();
		let rotation_string = now.format(".r_%m_%e_%Y_%T").to_string().replace(":", "-");
		let file_path = match self.config.file_path.rfind(".") {
			Some(pos) => &self.config.file_path[0..pos],
			_ => &self.config.file_path,
		};
		let file_path = format!(
			"{}{}_{}.log",
			file_path,
			rotation_string,
			rand::random::<u64>(),
		);
		std::fs::rename(&self.config.file_path, file_path)?;
		self.file = Some(
			OpenOptions::new()
				.append(true)
				.create(true)
				.open(&self.config.file_path)?,
		);
		Ok(())
	}

	/// The actual logging function, handles rotation if needed
	fn log(&mut self, line: &str) -> Result<(), Error> {
		let line_bytes = line.as_bytes();
		self.cur_size += line_bytes.len() as u64 + 1;
		if self.config.show_timestamp {
			// timestamp is an additional 23 bytes
			self.cur_size += 23;
		}
		let time_now = SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map_err(|e| {
				let error: Error =
					ErrorKind::InternalError(format!("time went backwards: {}", e)).into();
				error
			})?
			.as_millis();

		// check if rotation is needed
		if self.file.is_some()
			&& (self.cur_size >= self.config.max_size
				|| time_now.saturating_sub(self.init_age_millis) > self.config.max_age_millis)
		{
			self.rotate()?;
			if self.config.file_header.len() > 0 {
				if let Some(file) = self.file.as_mut() {
					file.write(self.config.file_header.as_bytes())?;
					file.write(&[10u8])?; // new line
				}
				self.cur_size = self.config.file_header.len() as u64 + 1;
			} else {
				self.cur_size = 0;
			}
			self.init_age_millis = time_now;
		}

		// if we're showing the timestamp, print it
		if self.config.show_timestamp {
			let date = Local::now();
			let formatted_ts = date.format("%Y-%m-%d %H:%M:%S");
			if let Some(file) = self.file.as_mut() {
				file.write(format!("[{}]: ", formatted_ts).as_bytes())?;
			}
			if self.config.show_stdout {
				print!("[{}]: ", formatted_ts);
			}
		}
		// finally log the line followed by a newline.
		if let Some(file) = self.file.as_mut() {
			file.write(line_bytes)?;
			file.write(&[10u8])?; // newline
		}

		// if stdout is specified log to stdout too
		if self.config.show_stdout {
			println!("{}", line);
		}

		Ok(())
	}
}

/// The main logging object
pub struct Log {
	params: Option<LogParams>,
}

impl Log {
	/// create a new Log object
	pub fn new() -> Log {
		Log { params: None }
	}

	/// whether or not this logger has been configured
	pub fn is_configured(&self) -> bool {
		self.params.is_some()
	}

	/// configure the logger with a [`LogConfig`] object
	pub fn config_with_object(&mut self, config: LogConfig) -> Result<(), Error> {
		// create file with append option and create option
		let file = match config.file_path.len() {
			0 => None,
			_ => Some(
				OpenOptions::new()
					.append(true)
					.create(true)
					.open(&config.file_path)?,
			),
		};

		// get current size of the file
		let mut cur_size = match config.file_path.len() {
			0 => 0,
			_ => metadata(&config.file_path)?.len(),
		};

		// age is only relative to start logging time
		let init_age_millis = SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map_err(|e| {
				let error: Error =
					ErrorKind::InternalError(format!("time went backwards: {}", e)).into();
				error
			})?
			.as_millis();

		let config = LogConfig {
			file_path: match config.file_path.len() {
				0 => "".to_string(),
				_ => canonicalize(PathBuf::from(&config.file_path))?
					.into_os_string()
					.into_string()?,
			},
			..config
		};

		if cur_size == 0 && file.is_some() && config.file_header.len() > 0 {
			// add the header if the file is new
			let line_bytes = config.file_header.as_bytes();
			if let Some(mut file) = file.as_ref() {
				file.write(line_bytes)?;
				file.write(&[10u8])?; // new line
			}
			cur_size = config.file_header.len() as u64 + 1;
		}

		self.params = Some(LogParams {
			file,
			cur_size,
			init_age_millis,
			config,
		});

		Ok(())
	}

	/// Entry point for logging
	pub fn log(&mut self, line: &str) -> Result<(), Error> {
		match self.params.as_mut() {
			Some(params) => {
				params.log(line)?;
				Ok(())
			}
			None => Err(ErrorKind::LogNotConfigured("log params None".to_string()).into()),
		}
	}

	/// Update the show_timestamp parameter for this logger
	pub fn update_show_timestamp(&mut self, show: bool) -> Result<(), Error> {
		match self.params.as_mut() {
			Some(params) => {
				params.config.show_timestamp = show;
				Ok(())
			}
			None => Err(ErrorKind::LogNotConfigured("log params None".to_string()).into()),
		}
	}

	/// Update the show_stdout parameter for this logger
	pub fn update_show_stdout(&mut self, show: bool) -> Result<(), Error> {
		match self.params.as_mut() {
			Some(params) => {
				params.config.show_stdout = show;
				Ok(())
			}
			None => Err(ErrorKind::LogNotConfigured("log params None".to_string()).into()),
		}
	}
}
