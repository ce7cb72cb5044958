use stackmeme_db::{Database, NewMeme};
use stackmeme_reactions::DeviceReactions;
use stackmeme_record::{ReactionKind, Visibility};
use stackmeme_session::{react_to_meme, Author, Reactor, ThreadSession};
use stackmeme_threads::ThreadedComment;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut db = Database::new("stackmeme.sqlite3").await.unwrap();
    let mut device = DeviceReactions::open("stackmeme_device_reactions.json".into()).unwrap();

    let meme = db
        .create_meme(NewMeme {
            image_url: "https://example.com/demo.png".to_string(),
            caption: Some("it compiles on my machine".to_string()),
            author: None,
            author_id: None,
            is_anonymous: true,
            visibility: Visibility::Public,
        })
        .await
        .unwrap();
    println!("meme: {}", meme.id);

    let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();
    let top = session
        .post_comment("first!", &Author::anonymous())
        .await
        .unwrap();
    session
        .post_reply(&top.id, "always has been", &Author::anonymous())
        .await
        .unwrap();
    session
        .react(&top.id, ReactionKind::Like, Reactor::Device(&mut device))
        .await
        .unwrap();

    println!("comments ({}):", session.comment_count());
    for comment in session.comments() {
        print_thread(&comment, 0);
    }

    react_to_meme(
        &mut db,
        &meme.id,
        ReactionKind::Like,
        Reactor::Device(&mut device),
    )
    .await
    .unwrap();

    let meme = db.get_meme(&meme.id).await.unwrap().unwrap();
    println!("meme likes: {}", meme.likes);

    println!("Done!")
}

fn print_thread(comment: &ThreadedComment, indent: usize) {
    println!(
        "{}[+{} -{}] {}",
        "  ".repeat(indent),
        comment.record.likes,
        comment.record.dislikes,
        comment.record.text
    );
    for reply in &comment.replies {
        print_thread(reply, indent + 1);
    }
}
