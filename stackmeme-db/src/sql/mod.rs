use log::trace;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode},
    ConnectOptions, Error as SqlError,
};
use std::str::FromStr;

mod comment_reactions;
mod comments;
mod memes;

pub(crate) use self::comment_reactions::*;
pub(crate) use self::comments::*;
pub use self::memes::SelectMemesOptions;
pub(crate) use self::memes::*;

pub async fn create_connection(path: &str) -> Result<SqliteConnection, SqlError> {
    SqliteConnectOptions::from_str(path)?
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true)
        .connect()
        .await
}

pub async fn setup_db(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    create_tables(connection).await?;
    create_indices(connection).await?;

    Ok(())
}

async fn create_tables(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating tables");
    create_memes_tables(connection).await?;
    create_comments_tables(connection).await?;
    create_comment_reactions_tables(connection).await?;

    Ok(())
}

async fn create_indices(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating indices");
    create_memes_indices(connection).await?;
    create_comments_indices(connection).await?;
    create_comment_reactions_indices(connection).await?;

    Ok(())
}
