use courier_shared::constants::MAX_MESSAGE_SIZE;
use courier_shared::protocol::{FileChunk, ServerFrame};
use courier_shared::{Message, UserId};

use super::Handlers;
use crate::assembly::{ChunkIngest, CompletedFile, IngestOutcome};
use crate::error::{EventError, ServerError};
use crate::worker::NotificationJob;

impl Handlers {
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> Result<Message, EventError> {
        if content.trim().is_empty() {
            return Err(EventError::Malformed("message content is empty".to_string()));
        }
        if content.len() > MAX_MESSAGE_SIZE {
            return Err(EventError::TooLarge {
                max: MAX_MESSAGE_SIZE,
            });
        }

        let message = self
            .messages
            .save_message(Message::text(sender, receiver, content))
            .await?;

        tracing::debug!(message = %message.id, sender = %sender, receiver = %receiver, "message stored");

        self.notifier
            .notify(
                sender,
                ServerFrame::MessageSentAck {
                    message: message.clone(),
                },
            )
            .await;
        self.notifier
            .notify(
                receiver,
                ServerFrame::NewMessageReceived {
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Store one chunk. Returns the file message once the last chunk lands.
    pub async fn ingest_chunk(
        &self,
        sender: UserId,
        chunk: FileChunk,
    ) -> Result<Option<Message>, EventError> {
        let data = chunk
            .chunk_data
            .into_bytes()
            .map_err(|e| EventError::Malformed(e.to_string()))?;

        let file_id = chunk.file_id.clone();
        let outcome = self.assembly.ingest(ChunkIngest {
            sender,
            receiver: chunk.receiver_id,
            file_id: chunk.file_id,
            file_name: chunk.file_name,
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            data,
        })?;

        match outcome {
            IngestOutcome::Progress(progress) => {
                self.report_progress(sender, file_id, progress);
                Ok(None)
            }
            IngestOutcome::Complete(file) => {
                self.report_progress(sender, file_id, 100.0);
                self.finish_upload(file).await.map(Some)
            }
        }
    }

    fn report_progress(&self, sender: UserId, file_id: String, progress: f64) {
        self.progress.enqueue(NotificationJob {
            user_id: sender,
            frame: ServerFrame::FileUploadProgress { file_id, progress },
            ephemeral: true,
        });
    }

    async fn finish_upload(&self, file: CompletedFile) -> Result<Message, EventError> {
        let stored = self
            .files
            .save(&file.file_name, &file.bytes)
            .await
            .map_err(|e| match e {
                ServerError::FileTooLarge { max, .. } => EventError::TooLarge { max },
                other => EventError::Storage(other.to_string()),
            })?;

        let message = self
            .messages
            .save_message(Message::file(
                file.sender,
                file.receiver,
                stored.storage_name,
                file.file_name,
                stored.mime_type,
            ))
            .await?;

        tracing::info!(
            file_id = %file.file_id,
            message = %message.id,
            size = stored.size,
            sender = %file.sender,
            receiver = %file.receiver,
            "file upload complete"
        );

        self.notifier
            .notify(
                file.sender,
                ServerFrame::FileSentAck {
                    message: message.clone(),
                },
            )
            .await;
        self.notifier
            .notify(
                file.receiver,
                ServerFrame::NewFileReceived {
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use courier_shared::protocol::{ChunkData, ErrorCode};
    use courier_shared::MessageType;
    use courier_store::MessageRepository;

    use super::*;
    use crate::handlers::harness::{next_frame, Harness};

    fn chunk(receiver: UserId, index: u32, total: u32, data: &[u8]) -> FileChunk {
        FileChunk {
            receiver_id: receiver,
            file_id: "upload-1".into(),
            file_name: "photo.bin".into(),
            chunk_index: index,
            total_chunks: total,
            chunk_data: ChunkData::Base64(base64::engine::general_purpose::STANDARD.encode(data)),
        }
    }

    #[tokio::test]
    async fn message_is_stored_and_delivered() {
        let mut h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let (_a, mut alice_rx) = h.online(alice);

        let message = h.handlers.send_message(alice, bob, "hi bob".into()).await.unwrap();

        assert_eq!(
            next_frame(&mut alice_rx).await,
            ServerFrame::MessageSentAck {
                message: message.clone()
            }
        );
        assert_eq!(
            h.drain_fallback(),
            vec![(bob, "NEW_MESSAGE_RECEIVED".to_string())]
        );
        assert_eq!(h.store.message(message.id).await.unwrap(), message);
    }

    #[tokio::test]
    async fn empty_and_oversized_messages_are_rejected() {
        let h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let err = h.handlers.send_message(alice, bob, "   ".into()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);

        let err = h
            .handlers
            .send_message(alice, bob, "x".repeat(MAX_MESSAGE_SIZE + 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooLarge);
    }

    #[tokio::test]
    async fn out_of_order_upload_produces_one_file_message() {
        let h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let (_a, mut alice_rx) = h.online(alice);
        let (_b, mut bob_rx) = h.online(bob);
        let parts: [&[u8]; 3] = [b"first-", b"second-", b"third"];

        let mut completed = Vec::new();
        for index in [2u32, 0, 1] {
            if let Some(message) = h
                .handlers
                .ingest_chunk(alice, chunk(bob, index, 3, parts[index as usize]))
                .await
                .unwrap()
            {
                completed.push(message);
            }
        }
        assert_eq!(completed.len(), 1);
        let message = completed.remove(0);
        assert_eq!(message.message_type, MessageType::File);
        assert_eq!(message.file_name.as_deref(), Some("photo.bin"));
        assert_eq!(message.file_mime_type.as_deref(), Some("text/plain; charset=utf-8"));

        // Progress comes from the worker, the ack straight from the handler.
        let mut progress = Vec::new();
        let mut acked = false;
        while progress.len() < 3 || !acked {
            match next_frame(&mut alice_rx).await {
                ServerFrame::FileUploadProgress { progress: p, .. } => progress.push(p),
                ServerFrame::FileSentAck { message: m } => {
                    assert_eq!(m.id, message.id);
                    acked = true;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(progress, vec![33.3, 66.7, 100.0]);

        assert_eq!(
            next_frame(&mut bob_rx).await,
            ServerFrame::NewFileReceived {
                message: message.clone()
            }
        );

        let storage_name = message.file_path.as_deref().unwrap();
        let bytes = h.handlers.files().read(storage_name).await.unwrap();
        assert_eq!(bytes, b"first-second-third");

        let conversation = h.store.conversation(alice, bob, 50).await.unwrap();
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_chunks_persist_exactly_one_file_message() {
        let mut h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let total = 16u32;

        let tasks: Vec<_> = (0..total)
            .rev()
            .map(|index| {
                let handlers = h.handlers.clone();
                tokio::spawn(async move {
                    let data = format!("part-{index:02};");
                    handlers
                        .ingest_chunk(alice, chunk(bob, index, total, data.as_bytes()))
                        .await
                })
            })
            .collect();

        let mut completed = Vec::new();
        for task in tasks {
            if let Some(message) = task.await.unwrap().unwrap() {
                completed.push(message);
            }
        }
        assert_eq!(completed.len(), 1);

        let conversation = h.store.conversation(alice, bob, 50).await.unwrap();
        assert_eq!(conversation, completed);

        let expected: String = (0..total).map(|i| format!("part-{i:02};")).collect();
        let storage_name = conversation[0].file_path.as_deref().unwrap();
        let bytes = h.handlers.files().read(storage_name).await.unwrap();
        assert_eq!(bytes, expected.as_bytes());

        let mut queued = h.drain_fallback();
        queued.sort();
        let mut want = vec![
            (alice, "FILE_SENT_ACK".to_string()),
            (bob, "NEW_FILE_RECEIVED".to_string()),
        ];
        want.sort();
        assert_eq!(queued, want);
    }

    #[tokio::test]
    async fn raw_byte_chunks_are_accepted() {
        let h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());

        let mut frame = chunk(bob, 0, 1, b"");
        frame.chunk_data = ChunkData::Bytes(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

        let message = h.handlers.ingest_chunk(alice, frame).await.unwrap().unwrap();
        assert_eq!(message.file_mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn bad_base64_is_malformed() {
        let h = Harness::new().await;
        let mut frame = chunk(UserId::new(), 0, 2, b"");
        frame.chunk_data = ChunkData::Base64("!!not base64!!".into());

        let err = h.handlers.ingest_chunk(UserId::new(), frame).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);
    }

    #[tokio::test]
    async fn oversized_upload_is_aborted() {
        let h = Harness::with_max_file_size(8).await;
        let (alice, bob) = (UserId::new(), UserId::new());

        h.handlers
            .ingest_chunk(alice, chunk(bob, 0, 2, b"12345"))
            .await
            .unwrap();
        let err = h
            .handlers
            .ingest_chunk(alice, chunk(bob, 1, 2, b"67890"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooLarge);
        assert!(h.store.conversation(alice, bob, 10).await.unwrap().is_empty());
    }
}
