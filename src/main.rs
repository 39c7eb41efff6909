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

use clap::load_yaml;
use clap::App;
use webserv_err::Error;
use webserv_http::{HttpServer, ServerConfig};
use webserv_log::*;

debug!();

fn main() {
	let res = real_main();
	match res {
		Ok(_) => {}
		Err(e) => println!("real_main generated Error: {}", e.to_string()),
	}
}

fn real_main() -> Result<(), Error> {
	log_config!(LogConfig::default())?;

	let yml = load_yaml!("webserv.yml");
	let args = App::from_yaml(yml)
		.version(env!("CARGO_PKG_VERSION"))
		.get_matches();

	let mut config = ServerConfig::default();
	if let Some(port) = args.value_of("port") {
		config.port = port.parse()?;
	}
	if let Some(root) = args.value_of("root") {
		config.root_dir = root.to_string();
	}
	if let Some(trigger) = args.value_of("trigger") {
		config.trigger_mode = trigger.parse()?;
	}
	if let Some(timeout) = args.value_of("timeout") {
		config.timeout_millis = timeout.parse()?;
	}
	if let Some(threads) = args.value_of("threads") {
		config.pool_size = threads.parse()?;
	}
	config.linger = args.is_present("linger");

	let mut server = HttpServer::new(config);
	server.start()?;
	info!("webserv exiting");
	Ok(())
}
