//! Admission and routing of incoming requests onto the work queue.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::acl::AllowList;
use super::event::EventLoopHandle;
use super::request::{HttpRequest, IncomingRequest, RequestMethod};
use super::router::{HandlerRegistry, RequestHandler};
use super::status::HttpStatus;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry;
use crate::workqueue::{WorkItem, WorkQueue};

/// A routed request waiting for a worker.
pub struct HttpWorkItem {
    request: HttpRequest,
    sub_path: String,
    handler: RequestHandler,
}

impl HttpWorkItem {
    pub fn new(request: HttpRequest, sub_path: String, handler: RequestHandler) -> Self {
        Self {
            request,
            sub_path,
            handler,
        }
    }

    pub fn into_request(self) -> HttpRequest {
        self.request
    }
}

impl WorkItem for HttpWorkItem {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn run(self) {
        let span = self.request.span().clone();
        let _entered = span.enter();
        (self.handler)(self.request, &self.sub_path);
    }
}

impl fmt::Debug for HttpWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWorkItem")
            .field("request", &self.request)
            .field("sub_path", &self.sub_path)
            .finish_non_exhaustive()
    }
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    ShuttingDown,
    Forbidden,
    BadMethod,
    NotFound,
    QueueFull,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::ShuttingDown => "shutting_down",
            Self::Forbidden => "forbidden",
            Self::BadMethod => "bad_method",
            Self::NotFound => "not_found",
            Self::QueueFull => "queue_full",
        }
    }
}

/// Entry point the network layer calls on the I/O thread for each request.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    queue: Arc<WorkQueue<HttpWorkItem>>,
    allow_list: AllowList,
    event_loop: EventLoopHandle,
    shutdown: ShutdownCoordinator,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        queue: Arc<WorkQueue<HttpWorkItem>>,
        allow_list: AllowList,
        event_loop: EventLoopHandle,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            registry,
            queue,
            allow_list,
            event_loop,
            shutdown,
        }
    }

    /// Admit, route and enqueue one request. Every path that does not
    /// enqueue replies immediately.
    pub fn dispatch(&self, incoming: IncomingRequest) -> Admission {
        let request = HttpRequest::new(incoming, self.event_loop.clone());
        debug!(
            request_id = %request.id(),
            method = %request.method(),
            uri = %request.uri(),
            peer = ?request.peer(),
            "Received request"
        );

        let admission = self.route(request);
        telemetry::record_admission(admission.as_str());
        admission
    }

    fn route(&self, mut request: HttpRequest) -> Admission {
        let Some(guard) = self.shutdown.track() else {
            request.write_reply(HttpStatus::ServiceUnavailable, "");
            return Admission::ShuttingDown;
        };
        request.track(guard);

        if !self.allow_list.allows(request.peer().map(|peer| peer.ip())) {
            debug!(
                peer = ?request.peer(),
                "HTTP request rejected: client network is not allowed RPC access"
            );
            request.write_reply(HttpStatus::Forbidden, "");
            return Admission::Forbidden;
        }

        if request.method() == RequestMethod::Unknown {
            request.write_reply(HttpStatus::BadMethod, "");
            return Admission::BadMethod;
        }

        let Some((handler, sub_path)) = self.registry.resolve(request.uri()) else {
            request.write_reply(HttpStatus::NotFound, "");
            return Admission::NotFound;
        };

        match self.queue.enqueue(HttpWorkItem::new(request, sub_path, handler)) {
            Ok(()) => Admission::Enqueued,
            Err(full) => {
                warn!(
                    max_depth = self.queue.max_depth(),
                    "request rejected because http work queue depth exceeded"
                );
                full.into_inner()
                    .into_request()
                    .write_reply(HttpStatus::InternalServerError, "Work queue depth exceeded");
                Admission::QueueFull
            }
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<WorkQueue<HttpWorkItem>> {
        &self.queue
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn is_accepting(&self) -> bool {
        self.shutdown.is_accepting()
    }
}
