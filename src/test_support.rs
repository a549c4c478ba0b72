//! Shared PostgreSQL test infrastructure.
//!
//! A single PostgreSQL testcontainer is started lazily for the whole test
//! binary; each test gets a fresh, uniquely named database on it so tests can
//! run in parallel without stepping on each other's bookkeeping tables or
//! advisory-lock space (advisory locks are scoped to a database).

use std::sync::OnceLock;

use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_ADMIN_DB: &str = "postgres";

struct SharedContainer {
    port: u16,
    // Keeps the container-management runtime (and with it the container)
    // alive for the duration of the test run.
    _rt: tokio::runtime::Runtime,
}

static CONTAINER: OnceLock<SharedContainer> = OnceLock::new();

fn postgres_port() -> u16 {
    // Escape hatch for environments without a Docker daemon: point the tests
    // at an already-running PostgreSQL (trust auth for PG_USER) instead of a
    // testcontainer.
    if let Ok(port) = std::env::var("PGMIGRATE_TEST_PORT") {
        return port
            .parse()
            .expect("PGMIGRATE_TEST_PORT must be a port number");
    }
    CONTAINER
        .get_or_init(|| {
            let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
            let port = rt.block_on(async {
                let container = Postgres::default()
                    .start()
                    .await
                    .expect("failed to start postgres container");
                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("failed to get postgres port");
                // Leak the container so it outlives this block; the process
                // exit tears it down with the runtime.
                std::mem::forget(container);
                port
            });
            SharedContainer { port, _rt: rt }
        })
        .port
}

fn url_for(db: &str) -> String {
    format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        PG_USER,
        PG_PASSWORD,
        postgres_port(),
        db
    )
}

/// Create a uniquely named database on the shared container and return a
/// session connected to it, along with the database name (for opening
/// additional sessions via [`session_on`]).
pub(crate) fn fresh_db() -> (Client, String) {
    let mut admin = Client::connect(&url_for(PG_ADMIN_DB), NoTls)
        .expect("failed to connect to admin database");
    let db_name = format!("test_{}", Uuid::new_v4().simple());
    admin
        .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
        .expect("failed to create test database");
    drop(admin);

    let client = Client::connect(&url_for(&db_name), NoTls)
        .expect("failed to connect to test database");
    (client, db_name)
}

/// Open another independent session on one of the test databases. Used by
/// concurrency tests that need a second lock holder.
pub(crate) fn session_on(db_name: &str) -> Client {
    Client::connect(&url_for(db_name), NoTls).expect("failed to open extra session")
}
