use std::future::Future;
use std::pin::Pin;

use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::db::Db;

type PostCommitHook = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Transaction wrapper carrying deferred side effects.
///
/// Hooks registered with `on_commit` run only after the transaction commits
/// successfully; a rollback (explicit or by drop) discards them. Storage
/// cleanup is scheduled this way so a rolled-back mutation never orphans a
/// delete of still-referenced files.
pub struct Uow {
    tx: Transaction<'static, Sqlite>,
    post_commit: Vec<PostCommitHook>,
}

impl Uow {
    pub async fn begin(pool: &Db) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx: pool.begin().await?,
            post_commit: Vec::new(),
        })
    }

    pub fn tx(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn on_commit<F>(&mut self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.post_commit.push(Box::pin(hook));
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await?;
        for hook in self.post_commit {
            hook.await;
        }
        Ok(())
    }
}
