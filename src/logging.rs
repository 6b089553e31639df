pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reefbuild_secrets=info".parse().unwrap()),
        )
        .init();
}
