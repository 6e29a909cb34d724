use tonic_build::manual::{Builder, Method, Service};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    Builder::new().compile(&[
        watch_service("Endpoints", "WatchReq"),
        watch_service("Global", "GlobalWatchReq"),
    ]);
}

/// Both watch APIs expose one bidirectional `Watch` method: each request asks for the next
/// diff, which is streamed back as ops terminated by a `Sync`.
fn watch_service(name: &str, request: &str) -> Service {
    Service::builder()
        .name(name)
        .package("kpng.v1")
        .method(
            Method::builder()
                .name("watch")
                .route_name("Watch")
                .input_type(format!("kpng_proxy_controller_core::api::{request}"))
                .output_type("kpng_proxy_controller_core::api::OpItem")
                .codec_path("tonic::codec::ProstCodec")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build()
}
