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
use errno::errno;
use lazy_static::lazy_static;
use libc::c_void;
use std::collections::HashMap;
use std::ffi::CString;
use webserv_err::{Error, ErrorKind};

lazy_static! {
	static ref SUFFIX_TYPE: HashMap<&'static str, &'static str> = {
		let mut m = HashMap::new();
		m.insert(".html", "text/html");
		m.insert(".xml", "text/xml");
		m.insert(".xhtml", "application/xhtml+xml");
		m.insert(".txt", "text/plain");
		m.insert(".rtf", "application/rtf");
		m.insert(".pdf", "application/pdf");
		m.insert(".word", "application/nsword");
		m.insert(".png", "image/png");
		m.insert(".gif", "image/gif");
		m.insert(".jpg", "image/jpg");
		m.insert(".au", "audio/basic");
		m.insert(".mpeg", "video/mpeg");
		m.insert(".mpg", "video/mpeg");
		m.insert(".avi", "video/x-msvideo");
		m.insert(".gz", "application/x-gzip");
		m.insert(".tar", "application/x-tar");
		m.insert(".css", "text/css");
		m.insert(".js", "text/javascript");
		m
	};
	static ref CODE_STATE: HashMap<u16, &'static str> = {
		let mut m = HashMap::new();
		m.insert(200, "OK");
		m.insert(400, "Bad Request");
		m.insert(403, "Forbidden");
		m.insert(404, "Not Found");
		m
	};
	static ref CODE_PATH: HashMap<u16, &'static str> = {
		let mut m = HashMap::new();
		m.insert(400, "/400.html");
		m.insert(403, "/403.html");
		m.insert(404, "/404.html");
		m
	};
}

/// A read-only private mapping of a file, unmapped on drop.
pub struct MappedFile {
	ptr: *mut c_void,
	len: usize,
}

// the mapping is read-only and owned for its whole lifetime
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
	fn map(path: &str) -> Result<Self, Error> {
		let cpath = CString::new(path)
			.map_err(|e| ErrorKind::IOError(format!("invalid path: {}", e)))?;
		let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) };
		if fd < 0 {
			return Err(ErrorKind::IOError(format!("open failed: {}", errno())).into());
		}
		let mut st: libc::stat = unsafe { std::mem::zeroed() };
		if unsafe { libc::fstat(fd, &mut st) } < 0 {
			let e = errno();
			unsafe { libc::close(fd) };
			return Err(ErrorKind::IOError(format!("fstat failed: {}", e)).into());
		}
		let len = st.st_size as usize;
		let ptr = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				len,
				libc::PROT_READ,
				libc::MAP_PRIVATE,
				fd,
				0,
			)
		};
		let e = errno();
		unsafe { libc::close(fd) };
		if ptr == libc::MAP_FAILED {
			return Err(ErrorKind::IOError(format!("mmap failed: {}", e)).into());
		}
		Ok(MappedFile { ptr, len })
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn as_slice(&self) -> &[u8] {
		unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
	}
}

impl Drop for MappedFile {
	fn drop(&mut self) {
		unsafe {
			libc::munmap(self.ptr, self.len);
		}
	}
}

/// Builds the response header bytes and resolves the body to a memory mapped
/// file. A forced non-2xx status from the caller wins over the filesystem
/// check; otherwise missing files and directories yield 404, files without
/// world read permission 403 and everything else 200. Known error statuses
/// are served from their fixed error page.
pub struct HttpResponse {
	code: u16,
	forced: Option<u16>,
	keep_alive: bool,
	path: String,
	root_dir: String,
	file: Option<MappedFile>,
}

impl HttpResponse {
	pub fn new() -> Self {
		HttpResponse {
			code: 0,
			forced: None,
			keep_alive: false,
			path: String::new(),
			root_dir: String::new(),
			file: None,
		}
	}

	/// Begin a new response. Any previous file mapping is released here.
	pub fn init(&mut self, root_dir: &str, path: String, keep_alive: bool, status: Option<u16>) {
		self.file = None;
		self.code = 0;
		self.forced = status;
		self.keep_alive = keep_alive;
		self.path = path;
		self.root_dir = root_dir.to_string();
	}

	pub fn code(&self) -> u16 {
		self.code
	}

	pub fn file(&self) -> Option<&MappedFile> {
		self.file.as_ref()
	}

	/// Drop the file mapping without waiting for the next build.
	pub fn release(&mut self) {
		self.file = None;
	}

	/// Append the status line and headers to `buffer` and map the body file.
	/// On open or mapping failure an inline error page is appended instead.
	pub fn build(&mut self, buffer: &mut Buffer) {
		self.file = None;
		self.code = match self.forced {
			Some(code) if code != 200 => code,
			_ => self.stat_code(),
		};

		if let Some(page) = CODE_PATH.get(&self.code) {
			self.path = page.to_string();
		}
		if CODE_STATE.get(&self.code).is_none() {
			self.code = 400;
			self.path = "/400.html".to_string();
		}

		self.append_status_line(buffer);
		self.append_headers(buffer);
		self.append_content(buffer);
	}

	fn stat_code(&self) -> u16 {
		let full = format!("{}{}", self.root_dir, self.path);
		match nix::sys::stat::stat(full.as_str()) {
			Ok(st) => {
				if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
					404
				} else if st.st_mode & libc::S_IROTH == 0 {
					403
				} else {
					200
				}
			}
			Err(_) => 404,
		}
	}

	fn append_status_line(&self, buffer: &mut Buffer) {
		let status = CODE_STATE.get(&self.code).unwrap_or(&"Bad Request");
		buffer.append(format!("HTTP/1.1 {} {}\r\n", self.code, status).as_bytes());
	}

	fn append_headers(&self, buffer: &mut Buffer) {
		buffer.append(b"Connection: ");
		if self.keep_alive {
			buffer.append(b"keep-alive\r\n");
			buffer.append(b"keep-alive: max=6, timeout=120\r\n");
		} else {
			buffer.append(b"close\r\n");
		}
		buffer.append(format!("Content-type: {}\r\n", self.file_type()).as_bytes());
	}

	fn append_content(&mut self, buffer: &mut Buffer) {
		let full = format!("{}{}", self.root_dir, self.path);
		match MappedFile::map(full.as_str()) {
			Ok(mapped) => {
				buffer.append(format!("Content-length: {}\r\n\r\n", mapped.len()).as_bytes());
				self.file = Some(mapped);
			}
			Err(_) => self.error_content(buffer, "File Not Found!"),
		}
	}

	fn file_type(&self) -> &str {
		match self.path.rfind('.') {
			Some(pos) => SUFFIX_TYPE
				.get(&self.path[pos..])
				.copied()
				.unwrap_or("text/plain"),
			None => "text/plain",
		}
	}

	/// Synthesized body for when no error page could be mapped.
	pub fn error_content(&self, buffer: &mut Buffer, message: &str) {
		let status = CODE_STATE.get(&self.code).unwrap_or(&"Bad Request");
		let body = format!(
			"<html><title>Error</title><body bgcolor=\"ffffff\">\
			{} : {}\n<p>{}</p><hr><em>webserv</em></body></html>",
			self.code, status, message
		);
		buffer.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
		buffer.append(body.as_bytes());
	}
}

impl Default for HttpResponse {
	fn default() -> Self {
		HttpResponse::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	fn temp_root(name: &str) -> String {
		let dir = std::env::temp_dir()
			.join(format!("webserv_response_{}_{}", name, rand::random::<u64>()));
		let dir = dir.display().to_string();
		fs::create_dir_all(&dir).unwrap();
		fs::write(format!("{}/index.html", dir), b"<html>home</html>").unwrap();
		fs::write(format!("{}/404.html", dir), b"<html>gone</html>").unwrap();
		fs::write(format!("{}/400.html", dir), b"<html>bad</html>").unwrap();
		dir
	}

	fn header_and_body(buffer: &mut Buffer, response: &HttpResponse) -> (String, Vec<u8>) {
		let header = buffer.retrieve_all_to_string();
		let body = response
			.file()
			.map(|f| f.as_slice().to_vec())
			.unwrap_or_else(|| vec![]);
		(header, body)
	}

	#[test]
	fn test_build_200() {
		let root = temp_root("ok");
		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/index.html".to_string(), true, None);
		response.build(&mut buffer);

		assert_eq!(response.code(), 200);
		let (header, body) = header_and_body(&mut buffer, &response);
		assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
		assert!(header.contains("Connection: keep-alive\r\n"));
		assert!(header.contains("Content-type: text/html\r\n"));
		assert!(header.contains("Content-length: 17\r\n\r\n"));
		assert_eq!(body, b"<html>home</html>");
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_missing_file_serves_404_page() {
		let root = temp_root("missing");
		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/nope.html".to_string(), false, None);
		response.build(&mut buffer);

		assert_eq!(response.code(), 404);
		let (header, body) = header_and_body(&mut buffer, &response);
		assert!(header.starts_with("HTTP/1.1 404 Not Found\r\n"));
		assert!(header.contains("Connection: close\r\n"));
		assert_eq!(body, b"<html>gone</html>");
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_forced_400_wins_over_stat() {
		let root = temp_root("forced");
		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		// the path does not exist but the forced status must not downgrade
		response.init(&root, "/whatever".to_string(), false, Some(400));
		response.build(&mut buffer);

		assert_eq!(response.code(), 400);
		let (header, body) = header_and_body(&mut buffer, &response);
		assert!(header.starts_with("HTTP/1.1 400 Bad Request\r\n"));
		assert_eq!(body, b"<html>bad</html>");
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_unknown_code_falls_back_to_400() {
		let root = temp_root("unknown");
		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/index.html".to_string(), false, Some(999));
		response.build(&mut buffer);

		assert_eq!(response.code(), 400);
		let (header, _) = header_and_body(&mut buffer, &response);
		assert!(header.starts_with("HTTP/1.1 400 Bad Request\r\n"));
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_inline_error_when_no_error_page() {
		let root = std::env::temp_dir()
			.join(format!("webserv_response_empty_{}", rand::random::<u64>()))
			.display()
			.to_string();
		fs::create_dir_all(&root).unwrap();

		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/nope.html".to_string(), false, None);
		response.build(&mut buffer);

		assert_eq!(response.code(), 404);
		assert!(response.file().is_none());
		let header = buffer.retrieve_all_to_string();
		assert!(header.contains("Content-length: "));
		assert!(header.contains("404 : Not Found"));
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_unreadable_file_is_403() {
		use std::os::unix::fs::PermissionsExt;

		let root = temp_root("forbidden");
		fs::write(format!("{}/403.html", root), b"<html>denied</html>").unwrap();
		let secret = format!("{}/secret.html", root);
		fs::write(&secret, b"<html>secret</html>").unwrap();
		// no world read bit, the mode check decides regardless of euid
		fs::set_permissions(&secret, fs::Permissions::from_mode(0o640)).unwrap();

		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/secret.html".to_string(), false, None);
		response.build(&mut buffer);

		assert_eq!(response.code(), 403);
		let (header, body) = header_and_body(&mut buffer, &response);
		assert!(header.starts_with("HTTP/1.1 403 Forbidden\r\n"));
		assert_eq!(body, b"<html>denied</html>");
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_directory_is_404() {
		let root = temp_root("dir");
		fs::create_dir_all(format!("{}/sub", root)).unwrap();
		let mut response = HttpResponse::new();
		let mut buffer = Buffer::new();
		response.init(&root, "/sub".to_string(), false, None);
		response.build(&mut buffer);
		assert_eq!(response.code(), 404);
		fs::remove_dir_all(&root).unwrap();
	}

	#[test]
	fn test_mime_lookup() {
		let mut response = HttpResponse::new();
		response.path = "/a/b/movie.mpg".to_string();
		assert_eq!(response.file_type(), "video/mpeg");
		response.path = "/readme".to_string();
		assert_eq!(response.file_type(), "text/plain");
		response.path = "/archive.weird".to_string();
		assert_eq!(response.file_type(), "text/plain");
	}
}
