#![allow(dead_code)]

//! PostgreSQL test infrastructure.
//!
//! One container is started for the whole test run; each test gets its own database.

use once_cell::sync::OnceCell;
use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// Default credentials for testcontainers-modules postgres
const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_DB: &str = "postgres";

struct SharedContainer {
    port: u16,
    // kept alive for the duration of the test run
    _container: ContainerAsync<Postgres>,
    _runtime: tokio::runtime::Runtime,
}

static CONTAINER: OnceCell<SharedContainer> = OnceCell::new();

fn postgres_port() -> u16 {
    CONTAINER
        .get_or_init(|| {
            let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
            let (container, port) = runtime.block_on(async {
                let container = Postgres::default()
                    .start()
                    .await
                    .expect("failed to start postgres container");
                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("failed to get postgres port");
                (container, port)
            });
            SharedContainer {
                port,
                _container: container,
                _runtime: runtime,
            }
        })
        .port
}

/// Connection URL for database `db` in the shared container.
pub fn url_with_db(db: &str) -> String {
    format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        PG_USER,
        PG_PASSWORD,
        postgres_port(),
        db
    )
}

pub fn connect_to(db: &str) -> Client {
    Client::connect(&url_with_db(db), NoTls).expect("failed to connect to test database")
}

/// Create a fresh database with a unique name and connect to it.
pub fn fresh_postgres_db() -> (Client, String) {
    let mut admin = connect_to(PG_DB);
    let db_name = format!("test_{}", Uuid::new_v4().simple());
    admin
        .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
        .expect("failed to create test database");
    drop(admin);

    (connect_to(&db_name), db_name)
}

pub fn get_test_client() -> Client {
    let (client, _db_name) = fresh_postgres_db();
    client
}
