use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{
    query,
    sqlite::{SqliteConnection, SqliteRow},
    Error as SqlError, Row,
};
use stackmeme_reactions::ReactionCounts;
use stackmeme_record::CommentRecord;
use stackmeme_ref::{CommentRef, IdentityRef, MemeRef};

use crate::Error;

pub async fn create_comments_tables(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating comments tables");

    query(
        "CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            meme_id TEXT NOT NULL,
            text TEXT NOT NULL,
            author TEXT,
            author_id TEXT,
            parent_id TEXT,
            depth INTEGER NOT NULL DEFAULT 0,
            likes INTEGER NOT NULL DEFAULT 0,
            dislikes INTEGER NOT NULL DEFAULT 0,
            replies_count INTEGER NOT NULL DEFAULT 0,
            is_anonymous INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
    )
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn create_comments_indices(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating comments indices");
    query("CREATE INDEX IF NOT EXISTS comments_meme_id_index on comments (meme_id)")
        .execute(&mut *connection)
        .await?;
    query("CREATE INDEX IF NOT EXISTS comments_parent_id_index on comments (parent_id)")
        .execute(&mut *connection)
        .await?;

    Ok(())
}

pub(crate) fn comment_from_row(row: &SqliteRow) -> Result<CommentRecord, Error> {
    let created_at: String = row.try_get("created_at")?;

    Ok(CommentRecord {
        id: CommentRef::from_string(row.try_get("id")?)?,
        meme_id: MemeRef::from_string(row.try_get("meme_id")?)?,
        text: row.try_get("text")?,
        author: row.try_get("author")?,
        author_id: row
            .try_get::<Option<String>, _>("author_id")?
            .map(IdentityRef::from_string)
            .transpose()?,
        parent_id: row
            .try_get::<Option<String>, _>("parent_id")?
            .map(CommentRef::from_string)
            .transpose()?,
        depth: row.try_get::<i64, _>("depth")?.max(0) as u32,
        likes: row.try_get::<i64, _>("likes")?.max(0) as u32,
        dislikes: row.try_get::<i64, _>("dislikes")?.max(0) as u32,
        replies_count: row.try_get::<i64, _>("replies_count")?.max(0) as u32,
        is_anonymous: row.try_get("is_anonymous")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

pub async fn insert_comment(
    connection: &mut SqliteConnection,
    comment: &CommentRecord,
) -> Result<(), Error> {
    trace!("Inserting comment {}", comment.id);
    query(
        "INSERT INTO comments (
            id, meme_id, text, author, author_id, parent_id,
            depth, likes, dislikes, replies_count, is_anonymous, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(comment.id.as_str())
    .bind(comment.meme_id.as_str())
    .bind(&comment.text)
    .bind(&comment.author)
    .bind(comment.author_id.as_ref().map(|id| id.as_str()))
    .bind(comment.parent_id.as_ref().map(|id| id.as_str()))
    .bind(comment.depth as i64)
    .bind(comment.likes as i64)
    .bind(comment.dislikes as i64)
    .bind(comment.replies_count as i64)
    .bind(comment.is_anonymous)
    .bind(comment.created_at.to_rfc3339())
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn select_comment(
    connection: &mut SqliteConnection,
    comment_ref: &CommentRef,
) -> Result<Option<CommentRecord>, Error> {
    let row = query("SELECT * FROM comments WHERE id = ?")
        .bind(comment_ref.as_str())
        .fetch_optional(connection)
        .await?;

    row.as_ref().map(comment_from_row).transpose()
}

pub async fn select_comments_for_meme(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
) -> Result<Vec<CommentRecord>, Error> {
    // rowid tiebreak keeps insertion order when timestamps collide
    let rows = query("SELECT * FROM comments WHERE meme_id = ? ORDER BY created_at ASC, rowid ASC")
        .bind(meme_ref.as_str())
        .fetch_all(connection)
        .await?;

    rows.iter().map(comment_from_row).collect()
}

pub async fn update_comment_counts(
    connection: &mut SqliteConnection,
    comment_ref: &CommentRef,
    counts: ReactionCounts,
) -> Result<(), Error> {
    query("UPDATE comments SET likes = ?, dislikes = ? WHERE id = ?")
        .bind(counts.likes as i64)
        .bind(counts.dislikes as i64)
        .bind(comment_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}

pub async fn bump_replies_count(
    connection: &mut SqliteConnection,
    comment_ref: &CommentRef,
    delta: i64,
) -> Result<(), Error> {
    query("UPDATE comments SET replies_count = MAX(replies_count + ?, 0) WHERE id = ?")
        .bind(delta)
        .bind(comment_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}

/// Deletes a comment and every descendant reply, plus their reaction rows.
/// Returns how many comments went away.
pub async fn delete_comment_tree(
    connection: &mut SqliteConnection,
    comment_ref: &CommentRef,
) -> Result<u64, Error> {
    trace!("Deleting comment tree rooted at {}", comment_ref);

    query(
        "WITH RECURSIVE subtree(id) AS (
            SELECT id FROM comments WHERE id = ?
            UNION ALL
            SELECT comments.id FROM comments
            JOIN subtree ON comments.parent_id = subtree.id
        )
        DELETE FROM comment_reactions WHERE comment_id IN (SELECT id FROM subtree)",
    )
    .bind(comment_ref.as_str())
    .execute(&mut *connection)
    .await?;

    let result = query(
        "WITH RECURSIVE subtree(id) AS (
            SELECT id FROM comments WHERE id = ?
            UNION ALL
            SELECT comments.id FROM comments
            JOIN subtree ON comments.parent_id = subtree.id
        )
        DELETE FROM comments WHERE id IN (SELECT id FROM subtree)",
    )
    .bind(comment_ref.as_str())
    .execute(connection)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_comments_for_meme(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
) -> Result<(), Error> {
    query(
        "DELETE FROM comment_reactions WHERE comment_id IN
         (SELECT id FROM comments WHERE meme_id = ?)",
    )
    .bind(meme_ref.as_str())
    .execute(&mut *connection)
    .await?;

    query("DELETE FROM comments WHERE meme_id = ?")
        .bind(meme_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}
