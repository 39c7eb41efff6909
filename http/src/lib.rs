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

//! An HTTP/1.1 server multiplexing many connections over epoll. A single
//! reactor thread polls for readiness and accepts new connections; all
//! per-connection read/parse/write work runs on a fixed thread pool. Idle
//! connections are evicted by an indexed min-heap of timers.

pub mod buffer;
pub mod connection;
pub mod request;
pub mod response;
pub mod server;

pub use crate::buffer::Buffer;
pub use crate::connection::{HttpConn, ProcessOutcome, WriteOutcome};
pub use crate::request::{HttpRequest, ParseState, ParseStatus};
pub use crate::response::{HttpResponse, MappedFile};
pub use crate::server::{HttpServer, ServerConfig};
