//! Creates the `calendar_connections` table holding one encrypted OAuth grant
//! per (user, calendar provider) pair.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalendarConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalendarConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalendarConnections::UserId).text().not_null())
                    .col(
                        ColumnDef::new(CalendarConnections::Provider)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::AccessTokenEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::RefreshTokenEncrypted)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::LastSyncError)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::SyncFailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::CalendarId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::CalendarName)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_connections_user_provider")
                    .table(CalendarConnections::Table)
                    .col(CalendarConnections::UserId)
                    .col(CalendarConnections::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Serves the refresh sweep's expiry scan.
        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_connections_token_expires_at")
                    .table(CalendarConnections::Table)
                    .col(CalendarConnections::TokenExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_calendar_connections_token_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_calendar_connections_user_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CalendarConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CalendarConnections {
    Table,
    Id,
    UserId,
    Provider,
    AccessTokenEncrypted,
    RefreshTokenEncrypted,
    TokenExpiresAt,
    IsActive,
    LastSyncedAt,
    LastSyncError,
    SyncFailureCount,
    CalendarId,
    CalendarName,
    CreatedAt,
    UpdatedAt,
}
