//! Hand-written equivalent of the `echo.EchoService` server bindings that
//! `tonic-prost-build` would generate, kept as close as possible to the
//! generated shape so the fixture behaves exactly like a real tonic service.
//!
//! The tower `Service` impl is specialized to `tonic::body::Body`, which is
//! all the in-process tests (and `tonic::service::Routes`) ever feed it.

use crate::pb::{EchoRequest, EchoResponse};
use std::sync::Arc;
use tonic::codegen::{BoxFuture, Context, Poll, Service, http, tokio_stream};
use tonic::{Request, Response, Status, Streaming};

/// The four call shapes of `echo.EchoService`.
#[tonic::async_trait]
pub trait EchoService: Send + Sync + 'static {
    type ServerStreamingEchoStream: tokio_stream::Stream<Item = Result<EchoResponse, Status>>
        + Send
        + 'static;
    type BidirectionalEchoStream: tokio_stream::Stream<Item = Result<EchoResponse, Status>>
        + Send
        + 'static;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status>;

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status>;

    async fn client_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoResponse>, Status>;

    async fn bidirectional_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalEchoStream>, Status>;
}

#[derive(Debug)]
pub struct EchoServiceServer<T> {
    inner: Arc<T>,
}

impl<T> EchoServiceServer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<T> Clone for EchoServiceServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> tonic::server::NamedService for EchoServiceServer<T> {
    const NAME: &'static str = "echo.EchoService";
}

impl<T> Service<http::Request<tonic::body::Body>> for EchoServiceServer<T>
where
    T: EchoService,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<tonic::body::Body>) -> Self::Future {
        match req.uri().path() {
            "/echo.EchoService/UnaryEcho" => {
                struct UnaryEchoSvc<T>(Arc<T>);
                impl<T: EchoService> tonic::server::UnaryService<EchoRequest> for UnaryEchoSvc<T> {
                    type Response = EchoResponse;
                    type Future = BoxFuture<Response<Self::Response>, Status>;
                    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
                        let inner = Arc::clone(&self.0);
                        Box::pin(async move { inner.unary_echo(request).await })
                    }
                }
                let inner = Arc::clone(&self.inner);
                Box::pin(async move {
                    let codec = tonic_prost::ProstCodec::<EchoResponse, EchoRequest>::default();
                    let mut grpc = tonic::server::Grpc::new(codec);
                    Ok(grpc.unary(UnaryEchoSvc(inner), req).await)
                })
            }
            "/echo.EchoService/ServerStreamingEcho" => {
                struct ServerStreamingEchoSvc<T>(Arc<T>);
                impl<T: EchoService> tonic::server::ServerStreamingService<EchoRequest>
                    for ServerStreamingEchoSvc<T>
                {
                    type Response = EchoResponse;
                    type ResponseStream = T::ServerStreamingEchoStream;
                    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;
                    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
                        let inner = Arc::clone(&self.0);
                        Box::pin(async move { inner.server_streaming_echo(request).await })
                    }
                }
                let inner = Arc::clone(&self.inner);
                Box::pin(async move {
                    let codec = tonic_prost::ProstCodec::<EchoResponse, EchoRequest>::default();
                    let mut grpc = tonic::server::Grpc::new(codec);
                    Ok(grpc.server_streaming(ServerStreamingEchoSvc(inner), req).await)
                })
            }
            "/echo.EchoService/ClientStreamingEcho" => {
                struct ClientStreamingEchoSvc<T>(Arc<T>);
                impl<T: EchoService> tonic::server::ClientStreamingService<EchoRequest>
                    for ClientStreamingEchoSvc<T>
                {
                    type Response = EchoResponse;
                    type Future = BoxFuture<Response<Self::Response>, Status>;
                    fn call(&mut self, request: Request<Streaming<EchoRequest>>) -> Self::Future {
                        let inner = Arc::clone(&self.0);
                        Box::pin(async move { inner.client_streaming_echo(request).await })
                    }
                }
                let inner = Arc::clone(&self.inner);
                Box::pin(async move {
                    let codec = tonic_prost::ProstCodec::<EchoResponse, EchoRequest>::default();
                    let mut grpc = tonic::server::Grpc::new(codec);
                    Ok(grpc.client_streaming(ClientStreamingEchoSvc(inner), req).await)
                })
            }
            "/echo.EchoService/BidirectionalEcho" => {
                struct BidirectionalEchoSvc<T>(Arc<T>);
                impl<T: EchoService> tonic::server::StreamingService<EchoRequest>
                    for BidirectionalEchoSvc<T>
                {
                    type Response = EchoResponse;
                    type ResponseStream = T::BidirectionalEchoStream;
                    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;
                    fn call(&mut self, request: Request<Streaming<EchoRequest>>) -> Self::Future {
                        let inner = Arc::clone(&self.0);
                        Box::pin(async move { inner.bidirectional_echo(request).await })
                    }
                }
                let inner = Arc::clone(&self.inner);
                Box::pin(async move {
                    let codec = tonic_prost::ProstCodec::<EchoResponse, EchoRequest>::default();
                    let mut grpc = tonic::server::Grpc::new(codec);
                    Ok(grpc.streaming(BidirectionalEchoSvc(inner), req).await)
                })
            }
            _ => Box::pin(async move {
                let mut response = http::Response::new(tonic::body::Body::default());
                let headers = response.headers_mut();
                headers.insert(
                    Status::GRPC_STATUS,
                    (tonic::Code::Unimplemented as i32).into(),
                );
                headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
                Ok(response)
            }),
        }
    }
}
