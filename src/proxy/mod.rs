// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend IO.
//!
//! Two handlers talk to the backend daemon:
//!
//! * [`ReverseProxy`] – replays a request verbatim and streams the answer
//!   back.  It is the router's fallback.
//! * [`Hijacker`] – replays attach / exec-start, relays the backend's
//!   answer and turns both connections into a raw [`HijackSession`].
//!
//! Both open one backend connection per request through [`backend`].

pub mod backend;
mod forward;
mod hijack;


pub use forward::ReverseProxy;
pub use hijack::{HijackSession, Hijacker};
