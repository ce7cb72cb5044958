use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{
    query,
    sqlite::{SqliteConnection, SqliteRow},
    types::Json,
    Error as SqlError, Row,
};
use stackmeme_reactions::ReactionCounts;
use stackmeme_record::{MemeRecord, Visibility};
use stackmeme_ref::{IdentityRef, MemeRef};
use std::str::FromStr;

use crate::Error;

pub async fn create_memes_tables(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating memes tables");

    query(
        "CREATE TABLE IF NOT EXISTS memes (
            id TEXT PRIMARY KEY,
            image_url TEXT NOT NULL,
            caption TEXT,
            author TEXT,
            author_id TEXT,
            likes INTEGER NOT NULL DEFAULT 0,
            dislikes INTEGER NOT NULL DEFAULT 0,
            comments_count INTEGER NOT NULL DEFAULT 0,
            user_likes TEXT NOT NULL DEFAULT '[]',
            user_dislikes TEXT NOT NULL DEFAULT '[]',
            is_anonymous INTEGER NOT NULL DEFAULT 1,
            visibility TEXT NOT NULL DEFAULT 'public',
            created_at TEXT NOT NULL
        )",
    )
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn create_memes_indices(connection: &mut SqliteConnection) -> Result<(), SqlError> {
    trace!("Creating memes indices");
    query("CREATE INDEX IF NOT EXISTS memes_created_at_index on memes (created_at)")
        .execute(&mut *connection)
        .await?;
    query("CREATE INDEX IF NOT EXISTS memes_is_anonymous_index on memes (is_anonymous)")
        .execute(&mut *connection)
        .await?;

    Ok(())
}

pub struct SelectMemesOptions {
    pub limit: i64,
    pub offset: i64,
    pub anonymous_only: bool,
}

impl Default for SelectMemesOptions {
    fn default() -> Self {
        SelectMemesOptions {
            limit: 20,
            offset: 0,
            anonymous_only: false,
        }
    }
}

pub(crate) fn meme_from_row(row: &SqliteRow) -> Result<MemeRecord, Error> {
    let Json(user_likes): Json<Vec<IdentityRef>> = row.try_get("user_likes")?;
    let Json(user_dislikes): Json<Vec<IdentityRef>> = row.try_get("user_dislikes")?;
    let created_at: String = row.try_get("created_at")?;
    let visibility: String = row.try_get("visibility")?;

    Ok(MemeRecord {
        id: MemeRef::from_string(row.try_get("id")?)?,
        image_url: row.try_get("image_url")?,
        caption: row.try_get("caption")?,
        author: row.try_get("author")?,
        author_id: row
            .try_get::<Option<String>, _>("author_id")?
            .map(IdentityRef::from_string)
            .transpose()?,
        likes: row.try_get::<i64, _>("likes")?.max(0) as u32,
        dislikes: row.try_get::<i64, _>("dislikes")?.max(0) as u32,
        comments_count: row.try_get::<i64, _>("comments_count")?.max(0) as u32,
        user_likes,
        user_dislikes,
        is_anonymous: row.try_get("is_anonymous")?,
        visibility: Visibility::from_str(&visibility).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

pub async fn insert_meme(connection: &mut SqliteConnection, meme: &MemeRecord) -> Result<(), Error> {
    trace!("Inserting meme {}", meme.id);
    query(
        "INSERT INTO memes (
            id, image_url, caption, author, author_id,
            likes, dislikes, comments_count, user_likes, user_dislikes,
            is_anonymous, visibility, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(meme.id.as_str())
    .bind(&meme.image_url)
    .bind(&meme.caption)
    .bind(&meme.author)
    .bind(meme.author_id.as_ref().map(|id| id.as_str()))
    .bind(meme.likes as i64)
    .bind(meme.dislikes as i64)
    .bind(meme.comments_count as i64)
    .bind(Json(&meme.user_likes))
    .bind(Json(&meme.user_dislikes))
    .bind(meme.is_anonymous)
    .bind(meme.visibility.as_str())
    .bind(meme.created_at.to_rfc3339())
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn select_meme(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
) -> Result<Option<MemeRecord>, Error> {
    let row = query("SELECT * FROM memes WHERE id = ?")
        .bind(meme_ref.as_str())
        .fetch_optional(connection)
        .await?;

    row.as_ref().map(meme_from_row).transpose()
}

pub async fn select_memes(
    connection: &mut SqliteConnection,
    options: SelectMemesOptions,
) -> Result<Vec<MemeRecord>, Error> {
    let rows = if options.anonymous_only {
        query(
            "SELECT * FROM memes WHERE is_anonymous = 1
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(options.limit)
        .bind(options.offset)
        .fetch_all(connection)
        .await?
    } else {
        query("SELECT * FROM memes ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(options.limit)
            .bind(options.offset)
            .fetch_all(connection)
            .await?
    };

    rows.iter().map(meme_from_row).collect()
}

pub async fn update_meme_counts(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
    counts: ReactionCounts,
) -> Result<(), Error> {
    query("UPDATE memes SET likes = ?, dislikes = ? WHERE id = ?")
        .bind(counts.likes as i64)
        .bind(counts.dislikes as i64)
        .bind(meme_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}

pub async fn update_meme_reactions(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
    counts: ReactionCounts,
    user_likes: &[IdentityRef],
    user_dislikes: &[IdentityRef],
) -> Result<(), Error> {
    query(
        "UPDATE memes SET likes = ?, dislikes = ?, user_likes = ?, user_dislikes = ?
         WHERE id = ?",
    )
    .bind(counts.likes as i64)
    .bind(counts.dislikes as i64)
    .bind(Json(user_likes))
    .bind(Json(user_dislikes))
    .bind(meme_ref.as_str())
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn bump_meme_comments(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
    delta: i64,
) -> Result<(), Error> {
    query("UPDATE memes SET comments_count = MAX(comments_count + ?, 0) WHERE id = ?")
        .bind(delta)
        .bind(meme_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}

pub async fn delete_meme_row(
    connection: &mut SqliteConnection,
    meme_ref: &MemeRef,
) -> Result<(), Error> {
    query("DELETE FROM memes WHERE id = ?")
        .bind(meme_ref.as_str())
        .execute(connection)
        .await?;

    Ok(())
}
