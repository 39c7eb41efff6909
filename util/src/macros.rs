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

/// Lock a mutex, mapping a poisoned lock to [`ErrorKind::PoisonError`] and
/// returning it from the enclosing function.
#[macro_export]
macro_rules! lock {
	($a:expr) => {
		$a.lock().map_err(|e| {
			let error: Error =
				ErrorKind::PoisonError(format!("Poison Error: {}", e.to_string())).into();
			error
		})?
	};
}

/// Write-lock a rwlock, mapping a poisoned lock to
/// [`ErrorKind::PoisonError`] and returning it from the enclosing function.
#[macro_export]
macro_rules! lockw {
	($a:expr) => {
		$a.write().map_err(|e| {
			let error: Error =
				ErrorKind::PoisonError(format!("Poison Error: {}", e.to_string())).into();
			error
		})?
	};
}

/// Read-lock a rwlock, mapping a poisoned lock to [`ErrorKind::PoisonError`]
/// and returning it from the enclosing function.
#[macro_export]
macro_rules! lockr {
	($a:expr) => {
		$a.read().map_err(|e| {
			let error: Error =
				ErrorKind::PoisonError(format!("Poison Error: {}", e.to_string())).into();
			error
		})?
	};
}

/// Lock a mutex, taking the guard even if the lock is poisoned. For paths
/// that must make progress, like eviction callbacks.
#[macro_export]
macro_rules! lockp {
	($a:expr) => {
		match $a.lock() {
			Ok(data) => data,
			Err(e) => e.into_inner(),
		}
	};
}

/// Read-lock a rwlock, taking the guard even if the lock is poisoned.
#[macro_export]
macro_rules! lockrp {
	($a:expr) => {
		match $a.read() {
			Ok(data) => data,
			Err(e) => e.into_inner(),
		}
	};
}

/// Write-lock a rwlock, taking the guard even if the lock is poisoned.
#[macro_export]
macro_rules! lockwp {
	($a:expr) => {
		match $a.write() {
			Ok(data) => data,
			Err(e) => e.into_inner(),
		}
	};
}
