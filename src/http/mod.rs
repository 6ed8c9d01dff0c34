//! HTTP request dispatch.
//!
//! The network layer parses requests on the I/O thread and hands each one
//! to [`Dispatcher::dispatch`]. Admitted requests become [`HttpWorkItem`]s
//! on the bounded work queue; handlers run on worker threads and reply
//! through [`HttpRequest::write_reply`], which posts the transmission back
//! to the I/O thread.

pub mod acl;
pub mod dispatch;
pub mod event;
pub mod request;
pub mod router;
pub mod server;
pub mod status;
pub mod timers;

pub use acl::{AclError, AllowList, Subnet};
pub use dispatch::{Admission, Dispatcher, HttpWorkItem};
pub use event::{Event, EventLoop, EventLoopError, EventLoopHandle, OneShotEvent};
pub use request::{HttpRequest, IncomingRequest, Reply, ReplySink, RequestMethod};
pub use router::{HandlerRegistry, PathHandler, RequestHandler};
pub use server::{HttpConfig, HttpServer, ServerError};
pub use status::HttpStatus;
pub use timers::DeadlineTimers;
