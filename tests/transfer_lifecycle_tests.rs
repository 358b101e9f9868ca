//! End-to-end tests for the escrow and repository transfer lifecycle

#[cfg(test)]
mod tests {
    use axum::async_trait;
    use sqlx::PgPool;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    use shipwright_backend::admin::{AdminActionRequest, AdminService};
    use shipwright_backend::github::{CodeHost, ProviderError, RepoRef};
    use shipwright_backend::notify::Notifier;
    use shipwright_backend::payments::{PaymentError, PaymentProcessor, RefundResult};
    use shipwright_backend::transaction::{
        CodeDeliveryStatus, CreateTransactionRequest, EscrowStatus, ListTransactionsQuery,
        PaymentStatus, TransactionService,
    };
    use shipwright_backend::transfer::{
        AccessCheckStatus, CollaboratorAccessPoller, TransferMethod, TransferService,
        TransferStatus,
    };

    /// Code host stub that records calls and can be told to fail
    struct StubCodeHost {
        fail: AtomicBool,
        invites_sent: AtomicUsize,
        transfers_done: AtomicUsize,
        collaborator_present: AtomicBool,
    }

    impl StubCodeHost {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                invites_sent: AtomicUsize::new(0),
                transfers_done: AtomicUsize::new(0),
                collaborator_present: AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        fn check_fail(&self) -> Result<(), ProviderError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ProviderError::UnexpectedStatus(500))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CodeHost for StubCodeHost {
        async fn send_collaborator_invite(
            &self,
            _repo: &RepoRef,
            _username: &str,
            _token: &str,
        ) -> Result<(), ProviderError> {
            self.check_fail()?;
            self.invites_sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn check_collaborator_access(
            &self,
            _repo: &RepoRef,
            _username: &str,
            _token: &str,
        ) -> Result<bool, ProviderError> {
            self.check_fail()?;
            Ok(self.collaborator_present.load(Ordering::SeqCst))
        }

        async fn transfer_repository_ownership(
            &self,
            _repo: &RepoRef,
            _new_owner: &str,
            _token: &str,
        ) -> Result<(), ProviderError> {
            self.check_fail()?;
            self.transfers_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Payment processor stub
    struct StubPaymentProcessor {
        fail: AtomicBool,
        refunds: AtomicUsize,
    }

    impl StubPaymentProcessor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                refunds: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PaymentProcessor for StubPaymentProcessor {
        async fn refund(
            &self,
            _payment_reference: &str,
            _amount_cents: Option<i64>,
        ) -> Result<RefundResult, PaymentError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PaymentError::UnexpectedStatus(500));
            }
            self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundResult {
                id: format!("re_{}", Uuid::new_v4()),
                status: "succeeded".to_string(),
            })
        }
    }

    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/shipwright_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn test_request() -> CreateTransactionRequest {
        CreateTransactionRequest {
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            amount_cents: 100_000,
            commission_cents: 18_000,
            payment_reference: format!("pi_{}", Uuid::new_v4()),
            repository_url: Some("https://github.com/octocat/hello-world".to_string()),
        }
    }

    async fn store_seller_token(pool: &PgPool, seller_id: Uuid) {
        sqlx::query(
            "INSERT INTO seller_credentials (seller_id, github_token) VALUES ($1, $2)",
        )
        .bind(seller_id)
        .bind("ghp_test_token")
        .execute(pool)
        .await
        .expect("Failed to store seller token");
    }

    #[tokio::test]
    async fn test_commission_split_invariant() {
        let request = test_request();
        assert!(request.validate().is_ok());
        assert_eq!(request.seller_receives_cents(), 82_000);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_full_lifecycle_invite_confirm_transfer() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;

        let tx = transactions.create_transaction(request).await.unwrap();
        assert_eq!(tx.escrow_status, EscrowStatus::Held);
        assert!(tx.escrow_release_at.is_some());

        // Buyer sets username, then seller initiates: invitation goes out.
        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        let transfer = transfers.initiate_transfer(seller, tx.id).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::InvitationSent);
        assert_eq!(code_host.invites_sent.load(Ordering::SeqCst), 1);

        // Re-initiating is an idempotent no-op: no second invitation.
        let again = transfers.initiate_transfer(seller, tx.id).await.unwrap();
        assert_eq!(again.status, TransferStatus::InvitationSent);
        assert_eq!(code_host.invites_sent.load(Ordering::SeqCst), 1);

        // Buyer confirms access.
        let transfer = transfers.confirm_transfer(buyer, tx.id).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::OwnershipTransferred);

        // Seller transfers ownership before the review period elapses:
        // ownership moves, escrow stays held.
        let outcome = transfers.transfer_ownership(seller, tx.id).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.escrow_released);
        assert_eq!(code_host.transfers_done.load(Ordering::SeqCst), 1);

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.escrow_status, EscrowStatus::Held);

        // Repeating the transfer is a skip, not an error.
        let outcome = transfers.transfer_ownership(seller, tx.id).await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(code_host.transfers_done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_provider_failure_leaves_state_unchanged() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();

        code_host.set_failing(true);
        let result = transfers.initiate_transfer(seller, tx.id).await;
        assert!(result.is_err());

        // No partial invite: the transfer row did not advance.
        let transfer = transfers.get_transfer(tx.id).await.unwrap().unwrap();
        assert_eq!(transfer.status, TransferStatus::NotStarted);
        assert!(transfer.invitation_sent_at.is_none());

        // Retry after the provider recovers.
        code_host.set_failing(false);
        let transfer = transfers.initiate_transfer(seller, tx.id).await.unwrap();
        assert_eq!(transfer.status, TransferStatus::InvitationSent);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_early_release_moves_funds_atomically() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        transfers.initiate_transfer(seller, tx.id).await.unwrap();
        transfers.confirm_transfer(buyer, tx.id).await.unwrap();

        let outcome = transfers.seller_early_release(seller, tx.id).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.escrow_released);

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.escrow_status, EscrowStatus::Released);
        assert!(tx.released_to_seller_at.is_some());
        // The stored release date is not rewritten by an early release.
        assert!(tx.escrow_release_at.unwrap() > tx.released_to_seller_at.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_permission_checks_use_persisted_parties() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        let stranger = Uuid::new_v4();
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        // Only the seller initiates; only the buyer sets the username.
        assert!(transfers.initiate_transfer(buyer, tx.id).await.is_err());
        assert!(transfers.initiate_transfer(stranger, tx.id).await.is_err());
        assert!(transfers
            .set_buyer_github_username(seller, tx.id, "octocat")
            .await
            .is_err());
        assert!(transactions.get_for_party(tx.id, stranger).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_dispute_blocks_transfer_and_refund_closes_escrow() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let processor = StubPaymentProcessor::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );
        let admin = AdminService::new(
            pool.clone(),
            processor.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        let admin_id = Uuid::new_v4();
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        transfers.initiate_transfer(seller, tx.id).await.unwrap();
        transfers.confirm_transfer(buyer, tx.id).await.unwrap();

        let reason = AdminActionRequest {
            reason: "Buyer reported the repository does not match the listing".to_string(),
        };

        admin
            .mark_disputed(admin_id, tx.id, &reason, None)
            .await
            .unwrap();

        // Ownership transfer is blocked while disputed.
        assert!(transfers.transfer_ownership(seller, tx.id).await.is_err());
        assert_eq!(code_host.transfers_done.load(Ordering::SeqCst), 0);

        let outcome = admin
            .refund_transaction(admin_id, tx.id, &reason, None)
            .await
            .unwrap();
        assert_eq!(outcome.amount_cents, 100_000);
        assert_eq!(processor.refunds.load(Ordering::SeqCst), 1);

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.payment_status, PaymentStatus::Refunded);
        assert_eq!(tx.escrow_status, EscrowStatus::Refunded);

        // A second refund attempt is rejected and does not hit the processor.
        assert!(admin
            .refund_transaction(admin_id, tx.id, &reason, None)
            .await
            .is_err());
        assert_eq!(processor.refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_refund_processor_failure_leaves_escrow_held() {
        let pool = setup_test_db().await;
        let processor = StubPaymentProcessor::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let admin = AdminService::new(
            pool.clone(),
            processor.clone(),
            Notifier::new(pool.clone()),
        );

        let tx = transactions
            .create_transaction(test_request())
            .await
            .unwrap();

        processor.fail.store(true, Ordering::SeqCst);
        let reason = AdminActionRequest {
            reason: "Processor outage drill for refund handling".to_string(),
        };
        assert!(admin
            .refund_transaction(Uuid::new_v4(), tx.id, &reason, None)
            .await
            .is_err());

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert!(TransactionService::funds_unmoved(&tx));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_post_review_transfer_releases_escrow_atomically() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        transfers.initiate_transfer(seller, tx.id).await.unwrap();
        transfers.confirm_transfer(buyer, tx.id).await.unwrap();

        // Review period over: ownership transfer and release land together.
        sqlx::query("UPDATE transactions SET escrow_release_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
            .bind(tx.id)
            .execute(&pool)
            .await
            .unwrap();

        let outcome = transfers.transfer_ownership(seller, tx.id).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.escrow_released);

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.escrow_status, EscrowStatus::Released);
        assert!(tx.released_to_seller_at.is_some());

        let transfer = transfers.get_transfer(tx.id).await.unwrap().unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.completed_at.is_some());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_manual_delivery_completes_without_provider() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let mut request = test_request();
        request.repository_url = None;
        let seller = request.seller_id;
        let tx = transactions.create_transaction(request).await.unwrap();

        // Initiation persists the transfer and marks delivery, with no
        // invitation to send.
        let transfer = transfers.initiate_transfer(seller, tx.id).await.unwrap();
        assert_eq!(transfer.transfer_method, TransferMethod::Manual);
        assert!(transfer.seller_initiated_at.is_some());
        assert_eq!(code_host.invites_sent.load(Ordering::SeqCst), 0);

        let tx_row = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx_row.code_delivery_status, CodeDeliveryStatus::Delivered);

        // The seller path still works: early release completes the transfer
        // and moves the funds without any provider call.
        let outcome = transfers.seller_early_release(seller, tx.id).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.escrow_released);
        assert_eq!(code_host.transfers_done.load(Ordering::SeqCst), 0);

        let transfer = transfers.get_transfer(tx.id).await.unwrap().unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);

        let tx_row = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx_row.escrow_status, EscrowStatus::Released);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_username_fixed_after_invitation_sent() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        transfers.initiate_transfer(seller, tx.id).await.unwrap();

        // A different username after the invitation went out is rejected.
        assert!(transfers
            .set_buyer_github_username(buyer, tx.id, "someone-else")
            .await
            .is_err());

        // Resubmitting the same value is a no-op, not a second invitation.
        let transfer = transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::InvitationSent);
        assert_eq!(transfer.buyer_github_username.as_deref(), Some("octocat"));
        assert_eq!(code_host.invites_sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_access_check_statuses() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );
        let poller = CollaboratorAccessPoller::new(pool.clone(), code_host.clone());

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        // No transfer record yet.
        let status = poller.check_access(buyer, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::InvitationNotSent);

        // Username known but no invitation out yet.
        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        let status = poller.check_access(buyer, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::InvitationNotSent);

        // Invitation out, not yet accepted at the provider.
        transfers.initiate_transfer(seller, tx.id).await.unwrap();
        let status = poller.check_access(seller, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::Pending);

        // Accepted once the provider lists the collaborator.
        code_host.collaborator_present.store(true, Ordering::SeqCst);
        let status = poller.check_access(buyer, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::Accepted);

        // Unparseable stored URL is a distinct cannot-verify state.
        sqlx::query("UPDATE transactions SET repository_url = 'not a url' WHERE id = $1")
            .bind(tx.id)
            .execute(&pool)
            .await
            .unwrap();
        let status = poller.check_access(buyer, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::InvalidGithubUrl);

        // Missing seller credential likewise.
        sqlx::query("DELETE FROM seller_credentials WHERE seller_id = $1")
            .bind(seller)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE transactions SET repository_url = 'https://github.com/octocat/hello-world' WHERE id = $1")
            .bind(tx.id)
            .execute(&pool)
            .await
            .unwrap();
        let status = poller.check_access(buyer, tx.id).await.unwrap();
        assert_eq!(status, AccessCheckStatus::SellerTokenMissing);

        // Strangers get no answer at all.
        assert!(poller.check_access(Uuid::new_v4(), tx.id).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_list_pagination_handles_large_page() {
        let pool = setup_test_db().await;
        let transactions = TransactionService::new(pool.clone(), 7);

        let request = test_request();
        let buyer = request.buyer_id;
        transactions.create_transaction(request).await.unwrap();

        let query = ListTransactionsQuery {
            escrow_status: None,
            payment_status: None,
            page: Some(i32::MAX),
            limit: Some(100),
        };
        let listed = transactions.list_for_party(buyer, query).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_sweep_releases_overdue_completed_transfers() {
        let pool = setup_test_db().await;
        let code_host = StubCodeHost::new();
        let transactions = TransactionService::new(pool.clone(), 7);
        let transfers = TransferService::new(
            pool.clone(),
            code_host.clone(),
            Notifier::new(pool.clone()),
        );

        let request = test_request();
        let buyer = request.buyer_id;
        let seller = request.seller_id;
        store_seller_token(&pool, seller).await;
        let tx = transactions.create_transaction(request).await.unwrap();

        transfers
            .set_buyer_github_username(buyer, tx.id, "octocat")
            .await
            .unwrap();
        transfers.initiate_transfer(seller, tx.id).await.unwrap();
        transfers.confirm_transfer(buyer, tx.id).await.unwrap();
        transfers.transfer_ownership(seller, tx.id).await.unwrap();

        // Backdate the release date to simulate a lost release write.
        sqlx::query("UPDATE transactions SET escrow_release_at = NOW() - INTERVAL '1 day' WHERE id = $1")
            .bind(tx.id)
            .execute(&pool)
            .await
            .unwrap();

        let released = transactions
            .release_overdue_completed_transfers()
            .await
            .unwrap();
        assert!(released.contains(&tx.id));

        let tx = transactions.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(tx.escrow_status, EscrowStatus::Released);

        // A second sweep pass finds nothing to do.
        let released = transactions
            .release_overdue_completed_transfers()
            .await
            .unwrap();
        assert!(!released.contains(&tx.id));
    }
}
