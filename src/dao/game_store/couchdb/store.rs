use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    game_store::{GameStore, sort_moves},
    models::{
        ChangeEvent, EvaluationEntity, MoveEntity, MovePatch, ParticipantEntity, ParticipantPatch,
        SessionEntity, SessionPatch, VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, CouchDocument, END_SUFFIX, change_event,
        evaluation_doc_id, evaluation_prefix, move_doc_id, move_prefix, participant_doc_id,
        participant_prefix, seq_param, session_doc_id, vote_doc_id, vote_prefix,
    },
};

/// Read-modify-write attempts before a revision race is reported as a conflict.
const MAX_UPDATE_ATTEMPTS: usize = 3;
const CHANGES_RETRY_INITIAL: Duration = Duration::from_millis(500);
const CHANGES_RETRY_MAX: Duration = Duration::from_secs(10);

/// [`GameStore`] backed by a shared CouchDB database.
#[derive(Clone)]
pub struct CouchGameStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    changes_timeout: Duration,
}

impl CouchGameStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            changes_timeout: config.changes_timeout,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412: another client created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<CouchDocument<T>>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchDocument<T>>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Write a document. Without a `_rev` this is an insert that fails on an existing id;
    /// with one it is an update that fails if the revision moved.
    async fn put_document<T>(&self, document: &CouchDocument<T>) -> CouchResult<()>
    where
        T: Serialize,
    {
        let doc_id = document.id.as_str();
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn insert_document<T>(&self, doc_id: String, body: T) -> StorageResult<T>
    where
        T: Serialize,
    {
        let document = CouchDocument::fresh(doc_id, body);
        self.put_document(&document).await?;
        Ok(document.body)
    }

    /// Read the current revision, let `mutate` edit it and write it back, re-reading when
    /// another client updated the document in between.
    async fn update_document<T, F>(&self, doc_id: &str, mut mutate: F) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> StorageResult<()>,
    {
        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            let Some(mut document) = self.get_document::<T>(doc_id).await? else {
                return Err(StorageError::not_found(doc_id));
            };
            mutate(&mut document.body)?;

            match self.put_document(&document).await {
                Ok(()) => return Ok(document.body),
                Err(CouchDaoError::Conflict { .. }) => {
                    debug!(doc_id, attempt, "revision moved during update; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StorageError::conflict(doc_id))
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::with_capacity(payload.rows.len());
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed: CouchDocument<T> =
                    from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                        path: row.id,
                        source,
                    })?;
                documents.push(parsed.body);
            }
        }

        Ok(documents)
    }

    /// Long-poll the database `_changes` feed once, starting after `since`.
    async fn poll_changes(&self, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "longpoll".to_string()),
            ("since", since.to_string()),
            ("timeout", self.changes_timeout.as_millis().to_string()),
        ];

        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }
}

impl GameStore for CouchGameStore {
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = session_doc_id(&session.id);
            store.insert_document(doc_id, session).await
        })
    }

    fn find_session(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        let doc_id = session_doc_id(id);
        Box::pin(async move {
            let document = store.get_document::<SessionEntity>(&doc_id).await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        let doc_id = session_doc_id(id);
        Box::pin(async move {
            store
                .update_document(&doc_id, |session: &mut SessionEntity| {
                    patch.clone().apply(session)
                })
                .await
        })
    }

    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = participant_doc_id(&participant.session_id, participant.id);
            store.insert_document(doc_id, participant).await
        })
    }

    fn find_participant(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        let doc_id = participant_doc_id(session_id, id);
        Box::pin(async move {
            let document = store.get_document::<ParticipantEntity>(&doc_id).await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn list_participants(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        let prefix = participant_prefix(session_id);
        Box::pin(async move { Ok(store.list_documents(&prefix).await?) })
    }

    fn update_participant(
        &self,
        session_id: &str,
        id: Uuid,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        let doc_id = participant_doc_id(session_id, id);
        Box::pin(async move {
            store
                .update_document(&doc_id, |participant: &mut ParticipantEntity| {
                    patch.clone().apply(participant);
                    Ok(())
                })
                .await
        })
    }

    fn insert_move(&self, mv: MoveEntity) -> BoxFuture<'static, StorageResult<MoveEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = move_doc_id(&mv.session_id, mv.id);
            store.insert_document(doc_id, mv).await
        })
    }

    fn find_move(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<MoveEntity>>> {
        let store = self.clone();
        let doc_id = move_doc_id(session_id, id);
        Box::pin(async move {
            let document = store.get_document::<MoveEntity>(&doc_id).await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn list_moves(&self, session_id: &str) -> BoxFuture<'static, StorageResult<Vec<MoveEntity>>> {
        let store = self.clone();
        let prefix = move_prefix(session_id);
        Box::pin(async move {
            let mut moves: Vec<MoveEntity> = store.list_documents(&prefix).await?;
            sort_moves(&mut moves);
            Ok(moves)
        })
    }

    fn update_move(
        &self,
        session_id: &str,
        id: Uuid,
        patch: MovePatch,
    ) -> BoxFuture<'static, StorageResult<MoveEntity>> {
        let store = self.clone();
        let doc_id = move_doc_id(session_id, id);
        Box::pin(async move {
            // The status guard is re-checked against every revision read, so a concurrent
            // resolver that wins the revision race turns this write into a conflict.
            store
                .update_document(&doc_id, |mv: &mut MoveEntity| patch.clone().apply(mv))
                .await
        })
    }

    fn insert_evaluation(
        &self,
        evaluation: EvaluationEntity,
    ) -> BoxFuture<'static, StorageResult<EvaluationEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = evaluation_doc_id(
                &evaluation.session_id,
                evaluation.move_id,
                evaluation.evaluator_id,
            );
            store.insert_document(doc_id, evaluation).await
        })
    }

    fn list_evaluations(
        &self,
        session_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<EvaluationEntity>>> {
        let store = self.clone();
        let prefix = evaluation_prefix(session_id);
        Box::pin(async move {
            let mut evaluations: Vec<EvaluationEntity> = store.list_documents(&prefix).await?;
            evaluations.sort_by_key(|evaluation| evaluation.created_at);
            Ok(evaluations)
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = vote_doc_id(&vote.session_id, vote.move_id, vote.voter_id);
            store.insert_document(doc_id, vote).await
        })
    }

    fn list_votes(
        &self,
        session_id: &str,
        move_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        let prefix = vote_prefix(session_id, move_id);
        Box::pin(async move { Ok(store.list_documents(&prefix).await?) })
    }

    fn subscribe(&self, session_id: &str) -> BoxStream<'static, ChangeEvent> {
        let store = self.clone();
        let session_id = session_id.to_string();
        Box::pin(async_stream::stream! {
            let mut since = "now".to_string();
            let mut delay = CHANGES_RETRY_INITIAL;
            loop {
                match store.poll_changes(&since).await {
                    Ok(batch) => {
                        delay = CHANGES_RETRY_INITIAL;
                        since = seq_param(&batch.last_seq);
                        for row in &batch.results {
                            if let Some(event) = change_event(row, &session_id) {
                                yield event;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, session_id = %session_id, "CouchDB changes feed failed; retrying");
                        sleep(delay).await;
                        delay = (delay * 2).min(CHANGES_RETRY_MAX);
                    }
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
