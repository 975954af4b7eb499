//! Database migrations for the calendar sync service.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_090000_create_calendar_connections;
mod m2026_01_10_090100_create_idempotency_keys;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_090000_create_calendar_connections::Migration),
            Box::new(m2026_01_10_090100_create_idempotency_keys::Migration),
        ]
    }
}
