use log::trace;
use sqlx::{query, sqlite::SqliteConnection, Error as SqlError, Row};
use stackmeme_record::{ReactionKind, ReactionRecord};
use stackmeme_ref::{CommentRef, IdentityRef, ReactionRef};
use std::str::FromStr;

use crate::Error;

pub async fn create_comment_reactions_tables(
    connection: &mut SqliteConnection,
) -> Result<(), SqlError> {
    trace!("Creating comment reactions tables");

    query(
        "CREATE TABLE IF NOT EXISTS comment_reactions (
            id TEXT PRIMARY KEY,
            comment_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            author_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn create_comment_reactions_indices(
    connection: &mut SqliteConnection,
) -> Result<(), SqlError> {
    trace!("Creating comment reactions indices");
    query(
        "CREATE INDEX IF NOT EXISTS comment_reactions_comment_author_index
         on comment_reactions (comment_id, author_id)",
    )
    .execute(connection)
    .await?;

    Ok(())
}

// At most one reaction row per (comment, identity); the toggle logic keeps
// that invariant.
pub async fn select_reaction_by_author(
    connection: &mut SqliteConnection,
    comment_ref: &CommentRef,
    author_id: &IdentityRef,
) -> Result<Option<(ReactionRef, ReactionKind)>, Error> {
    let row = query("SELECT id, kind FROM comment_reactions WHERE comment_id = ? AND author_id = ?")
        .bind(comment_ref.as_str())
        .bind(author_id.as_str())
        .fetch_optional(connection)
        .await?;

    match row {
        Some(row) => {
            let id = ReactionRef::from_string(row.try_get("id")?)?;
            let kind = ReactionKind::from_str(row.try_get::<String, _>("kind")?.as_str())?;
            Ok(Some((id, kind)))
        }
        None => Ok(None),
    }
}

pub async fn insert_reaction(
    connection: &mut SqliteConnection,
    reaction: &ReactionRecord,
) -> Result<(), Error> {
    trace!(
        "Inserting {} reaction on comment {}",
        reaction.kind,
        reaction.comment_id
    );
    query(
        "INSERT INTO comment_reactions (id, comment_id, kind, author_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(reaction.id.as_str())
    .bind(reaction.comment_id.as_str())
    .bind(reaction.kind.as_str())
    .bind(reaction.author_id.as_str())
    .bind(reaction.created_at.to_rfc3339())
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn update_reaction_kind(
    connection: &mut SqliteConnection,
    reaction_ref: &ReactionRef,
    kind: ReactionKind,
) -> Result<(), Error> {
    query("UPDATE comment_reactions SET kind = ? WHERE id = ?")
        .bind(kind.as_str())
        .bind(reaction_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}

pub async fn delete_reaction(
    connection: &mut SqliteConnection,
    reaction_ref: &ReactionRef,
) -> Result<(), Error> {
    query("DELETE FROM comment_reactions WHERE id = ?")
        .bind(reaction_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}
