use std::rc::Rc;

use anyhow::Context;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use murmur_client::{
    api::{CommentId, NewComment, NewPost, Post, PostId, PostPatch},
    Author, Client, ClientConfig, CommentNode, HttpRemote, SystemIds,
};

#[derive(structopt::StructOpt)]
struct Opt {
    /// Base URL of the posts service
    #[structopt(short, long)]
    host: String,

    #[structopt(long, default_value = "20")]
    page_size: usize,

    /// Name to sign new posts and comments with
    #[structopt(long)]
    author: Option<String>,

    /// Avatar URL to sign new posts and comments with
    #[structopt(long)]
    avatar: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// List the latest posts
    Posts {
        /// Number of pages to go through
        #[structopt(long, default_value = "1")]
        pages: usize,
    },

    /// Show a post along with its comment threads
    Show { post: String },

    NewPost {
        title: String,
        content: String,
    },

    EditPost {
        post: String,

        #[structopt(long)]
        title: Option<String>,

        #[structopt(long)]
        content: Option<String>,
    },

    DeletePost { post: String },

    /// Comment on a post, or reply to a comment
    Comment {
        post: String,
        content: String,

        #[structopt(long)]
        reply_to: Option<String>,
    },

    EditComment {
        post: String,
        comment: String,
        content: String,
    },

    /// Delete a comment and all the replies below it
    DeleteComment { post: String, comment: String },
}

/// Runs background refetches on the current `LocalSet`
struct LocalSetSpawner;

impl LocalSpawn for LocalSetSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        tokio::task::spawn_local(future);
        Ok(())
    }
}

fn print_post(post: &Post) {
    println!(
        "[{}] {} by {} ({})",
        post.id,
        post.title,
        post.author_name,
        post.created_at.format("%Y-%m-%d %H:%M")
    );
}

fn print_tree(tree: &[CommentNode]) {
    let mut todo = tree.iter().rev().map(|n| (n, 0)).collect::<Vec<_>>();
    while let Some((node, depth)) = todo.pop() {
        let c = &node.comment;
        println!(
            "{:indent$}[{}] {}: {}",
            "",
            c.id,
            c.author_name,
            c.content,
            indent = depth * 2
        );
        todo.extend(node.replies.iter().rev().map(|r| (r, depth + 1)));
    }
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let mut default_author = Author::default();
    if let Some(name) = opt.author {
        default_author.name = name;
    }
    if let Some(avatar) = opt.avatar {
        default_author.avatar = avatar;
    }
    let config = ClientConfig {
        page_size: opt.page_size,
        default_author,
        ..ClientConfig::default()
    };
    tracing::debug!(host = %opt.host, page_size = opt.page_size, "starting client");
    let client = Client::new(
        Rc::new(HttpRemote::new(opt.host)),
        Rc::new(LocalSetSpawner),
        Rc::new(SystemIds::new()),
        config,
    );

    match opt.cmd {
        Command::Posts { pages } => {
            for _ in 0..pages {
                if !client.fetch_next_posts().await.context("fetching posts")? {
                    break;
                }
            }
            for post in client.posts().iter().flat_map(|p| p.iter()) {
                print_post(post);
            }
            if client.has_more_posts() {
                println!("...");
            }
        }
        Command::Show { post } => {
            let id = PostId(post);
            let post = client
                .load_post(&id)
                .await
                .with_context(|| format!("loading post {id}"))?
                .with_context(|| format!("post {id} does not exist"))?;
            print_post(&post);
            println!("{}\n", post.content);
            client
                .load_comments(&id)
                .await
                .with_context(|| format!("loading comments of post {id}"))?;
            print_tree(&client.comment_tree(&id));
        }
        Command::NewPost { title, content } => {
            let post = client
                .create_post(NewPost {
                    title: Some(title),
                    content: Some(content),
                    ..NewPost::default()
                })
                .await
                .context("creating post")?;
            print_post(&post);
        }
        Command::EditPost {
            post,
            title,
            content,
        } => {
            let patch = PostPatch {
                title,
                content,
                ..PostPatch::default()
            };
            let post = client
                .update_post(&PostId(post), patch)
                .await
                .context("updating post")?;
            print_post(&post);
        }
        Command::DeletePost { post } => {
            client
                .delete_post(&PostId(post))
                .await
                .context("deleting post")?;
        }
        Command::Comment {
            post,
            content,
            reply_to,
        } => {
            let comment = NewComment {
                content,
                parent_id: reply_to.map(CommentId),
                ..NewComment::default()
            };
            let c = client
                .create_comment(&PostId(post), comment)
                .await
                .context("posting comment")?;
            println!("[{}] {}", c.id, c.content);
        }
        Command::EditComment {
            post,
            comment,
            content,
        } => {
            client
                .update_comment(&PostId(post), &CommentId(comment), content)
                .await
                .context("editing comment")?;
        }
        Command::DeleteComment { post, comment } => {
            client
                .delete_comment(&PostId(post), &CommentId(comment))
                .await
                .context("deleting comment")?;
        }
    }

    client.teardown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("initializing tokio runtime")?;
    tokio::task::LocalSet::new().block_on(&runtime, run(opt))
}
