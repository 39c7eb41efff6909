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
use std::collections::HashMap;

// extension-less paths served as .html pages
const DEFAULT_HTML: [&str; 6] = [
	"/index",
	"/register",
	"/login",
	"/welcome",
	"/video",
	"/picture",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseState {
	RequestLine,
	Header,
	Body,
	Finish,
}

/// Outcome of one incremental parse step.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
	/// No complete line buffered yet. Parser state is preserved; read more
	/// and call parse again.
	Again,
	/// The request is fully parsed.
	Complete,
	/// The request line is malformed. Terminal for this request.
	BadRequest,
}

/// Incremental HTTP/1.1 request parser. Consumes complete CRLF terminated
/// lines from the input buffer one at a time and leaves partial lines in
/// place until more bytes arrive.
pub struct HttpRequest {
	state: ParseState,
	method: String,
	path: String,
	version: String,
	body: String,
	headers: HashMap<String, String>,
	form: HashMap<String, String>,
}

impl HttpRequest {
	pub fn new() -> Self {
		HttpRequest {
			state: ParseState::RequestLine,
			method: String::new(),
			path: String::new(),
			version: String::new(),
			body: String::new(),
			headers: HashMap::new(),
			form: HashMap::new(),
		}
	}

	/// Reset for the next request on a kept-alive connection.
	pub fn init(&mut self) {
		self.state = ParseState::RequestLine;
		self.method.clear();
		self.path.clear();
		self.version.clear();
		self.body.clear();
		self.headers.clear();
		self.form.clear();
	}

	pub fn state(&self) -> ParseState {
		self.state
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn body(&self) -> &str {
		&self.body
	}

	pub fn header(&self, key: &str) -> Option<&str> {
		self.headers.get(key).map(|v| v.as_str())
	}

	pub fn form_value(&self, key: &str) -> Option<&str> {
		self.form.get(key).map(|v| v.as_str())
	}

	/// Connection reuse requires HTTP/1.1 and an explicit keep-alive header.
	pub fn is_keep_alive(&self) -> bool {
		self.version == "1.1"
			&& self
				.headers
				.get("Connection")
				.map(|v| v == "keep-alive")
				.unwrap_or(false)
	}

	/// Drive the state machine over the buffered bytes. Consumed lines leave
	/// the buffer; an incomplete trailing line stays for the next call.
	pub fn parse(&mut self, buffer: &mut Buffer) -> ParseStatus {
		while buffer.readable_bytes() > 0 && self.state != ParseState::Finish {
			let (line_end, has_crlf) = match find_crlf(buffer.as_slice()) {
				Some(pos) => (pos, true),
				None => {
					if self.state == ParseState::Body {
						// the body is the unterminated remainder
						(buffer.readable_bytes(), false)
					} else {
						return ParseStatus::Again;
					}
				}
			};
			let line = String::from_utf8_lossy(&buffer.as_slice()[0..line_end]).into_owned();

			match self.state {
				ParseState::RequestLine => {
					if !self.parse_request_line(&line) {
						return ParseStatus::BadRequest;
					}
					self.resolve_path();
				}
				ParseState::Header => {
					self.parse_header(&line);
					if buffer.readable_bytes() <= 2 {
						// nothing beyond the separator, no body follows
						self.state = ParseState::Finish;
					}
				}
				ParseState::Body => {
					self.parse_body(line);
				}
				ParseState::Finish => {}
			}

			buffer.retrieve(line_end + if has_crlf { 2 } else { 0 });
		}

		if self.state == ParseState::Finish {
			ParseStatus::Complete
		} else {
			ParseStatus::Again
		}
	}

	/// `METHOD SP PATH SP HTTP/VERSION` with no extra fields.
	fn parse_request_line(&mut self, line: &str) -> bool {
		let mut parts = line.split(' ');
		let method = parts.next().unwrap_or("");
		let path = parts.next().unwrap_or("");
		let proto = parts.next().unwrap_or("");
		if method.is_empty() || path.is_empty() || parts.next().is_some() {
			return false;
		}
		let version = match proto.strip_prefix("HTTP/") {
			Some(v) => v,
			None => return false,
		};
		self.method = method.to_string();
		self.path = path.to_string();
		self.version = version.to_string();
		self.state = ParseState::Header;
		true
	}

	fn resolve_path(&mut self) {
		if self.path == "/" {
			self.path = "/index.html".to_string();
		} else if DEFAULT_HTML.contains(&self.path.as_str()) {
			self.path.push_str(".html");
		}
	}

	/// `KEY: VALUE` with an optional space after the colon. A line without a
	/// colon is the blank separator; headers are done.
	fn parse_header(&mut self, line: &str) {
		match line.find(':') {
			Some(pos) => {
				let key = &line[0..pos];
				let value = line[pos + 1..].strip_prefix(' ').unwrap_or(&line[pos + 1..]);
				self.headers.insert(key.to_string(), value.to_string());
			}
			None => self.state = ParseState::Body,
		}
	}

	fn parse_body(&mut self, line: String) {
		self.body = line;
		self.parse_form();
		self.state = ParseState::Finish;
	}

	/// Decode a url-encoded POST form into the key/value mapping. `+` decodes
	/// to space and `%XX` to the byte it names; malformed escapes pass
	/// through untouched.
	fn parse_form(&mut self) {
		if self.method != "POST" {
			return;
		}
		match self.headers.get("Content-Type") {
			Some(v) if v == "application/x-www-form-urlencoded" => {}
			_ => return,
		}

		let bytes = self.body.as_bytes();
		let mut key: Option<String> = None;
		let mut token: Vec<u8> = vec![];
		let mut i = 0;
		while i < bytes.len() {
			match bytes[i] {
				b'=' => {
					key = Some(String::from_utf8_lossy(&token).into_owned());
					token.clear();
				}
				b'&' => {
					if let Some(key) = key.take() {
						self.form
							.insert(key, String::from_utf8_lossy(&token).into_owned());
					}
					token.clear();
				}
				b'+' => token.push(b' '),
				b'%' => {
					match (hex_value(bytes.get(i + 1)), hex_value(bytes.get(i + 2))) {
						(Some(hi), Some(lo)) => {
							token.push(hi * 16 + lo);
							i += 2;
						}
						_ => token.push(b'%'),
					}
				}
				b => token.push(b),
			}
			i += 1;
		}
		if let Some(key) = key.take() {
			if !self.form.contains_key(&key) {
				self.form
					.insert(key, String::from_utf8_lossy(&token).into_owned());
			}
		}
	}
}

impl Default for HttpRequest {
	fn default() -> Self {
		HttpRequest::new()
	}
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
	bytes.windows(2).position(|w| w == b"\r\n")
}

fn hex_value(b: Option<&u8>) -> Option<u8> {
	match b {
		Some(b @ b'0'..=b'9') => Some(b - b'0'),
		Some(b @ b'a'..=b'f') => Some(b - b'a' + 10),
		Some(b @ b'A'..=b'F') => Some(b - b'A' + 10),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn buffer_with(bytes: &[u8]) -> Buffer {
		let mut buffer = Buffer::new();
		buffer.append(bytes);
		buffer
	}

	#[test]
	fn test_get_keep_alive() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"GET /index HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.method(), "GET");
		assert_eq!(request.path(), "/index.html");
		assert_eq!(request.version(), "1.1");
		assert_eq!(request.state(), ParseState::Finish);
		assert!(request.is_keep_alive());
	}

	#[test]
	fn test_root_path_rewrite() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"GET / HTTP/1.1\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.path(), "/index.html");
		// 1.1 without the header is not keep-alive
		assert!(!request.is_keep_alive());
	}

	#[test]
	fn test_incremental_parse_preserves_state() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"GET /a.txt HTTP/1.1\r\nHost: loc");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Again);
		// the request line was consumed, the partial header stayed
		assert_eq!(request.state(), ParseState::Header);
		assert_eq!(buffer.as_slice(), b"Host: loc");

		buffer.append(b"alhost\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.header("Host"), Some("localhost"));
	}

	#[test]
	fn test_malformed_request_line() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"BADREQUEST\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::BadRequest);

		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"GET /x SMTP/1.1\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::BadRequest);
	}

	#[test]
	fn test_post_form() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(
			b"POST /login HTTP/1.1\r\n\
			Content-Type: application/x-www-form-urlencoded\r\n\
			\r\n\
			a=1&b=2",
		);
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.path(), "/login.html");
		assert_eq!(request.form_value("a"), Some("1"));
		assert_eq!(request.form_value("b"), Some("2"));
	}

	#[test]
	fn test_form_decoding() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(
			b"POST /register HTTP/1.1\r\n\
			Content-Type: application/x-www-form-urlencoded\r\n\
			\r\n\
			name=hello+world&pass=%41%62%2B\r\n",
		);
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.form_value("name"), Some("hello world"));
		assert_eq!(request.form_value("pass"), Some("Ab+"));
	}

	#[test]
	fn test_init_resets_for_next_request() {
		let mut request = HttpRequest::new();
		let mut buffer = buffer_with(b"GET /welcome HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		request.init();
		assert_eq!(request.state(), ParseState::RequestLine);
		assert_eq!(request.method(), "");

		let mut buffer = buffer_with(b"GET /video HTTP/1.1\r\nConnection: close\r\n\r\n");
		assert_eq!(request.parse(&mut buffer), ParseStatus::Complete);
		assert_eq!(request.path(), "/video.html");
		assert!(!request.is_keep_alive());
	}
}
