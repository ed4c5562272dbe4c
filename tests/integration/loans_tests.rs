//! Borrow and return, including concurrent callers

use biblion_server::{
    models::{
        book::UpdateBook,
        loan::LoanStatus,
        user::{Actor, UserRole},
    },
    AppError,
};
use chrono::Duration;
use tokio::task::JoinSet;
use tokio_test::{assert_err, assert_ok};

use crate::support::{self, CLEAN_CODE, DELAYS};

fn actor(user_id: &str, role: UserRole) -> Actor {
    Actor {
        user_id: user_id.to_string(),
        role,
    }
}

#[tokio::test]
async fn test_lending_scenario() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let a = support::create_user(&repo, "a@example.com", UserRole::Student).await;
    let b = support::create_user(&repo, "b@example.com", UserRole::Student).await;

    let book = repo.books.create(support::new_book(CLEAN_CODE, 2)).await.unwrap();
    assert_eq!(book.available_copies, 2);
    assert!(book.available);

    let loan_a = loans.borrow(&a.id, &book.id).await.unwrap();
    assert_eq!(loan_a.status, LoanStatus::Active);
    assert_eq!(loan_a.due_date - loan_a.borrow_date, Duration::days(14));
    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 1);
    assert!(stored.available);

    loans.borrow(&b.id, &book.id).await.unwrap();
    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 0);
    assert!(!stored.available);

    let again = loans.borrow(&a.id, &book.id).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    let returned = loans
        .return_loan(&loan_a.id, &actor(&a.id, UserRole::Student))
        .await
        .unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(returned.return_date.is_some());

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 1);
    assert!(stored.available);

    let persisted = repo.loans.find_by_id(&loan_a.id).await.unwrap().unwrap();
    assert_eq!(persisted, returned);
}

#[tokio::test]
async fn test_borrow_unknown_book_is_not_found() {
    let repo = support::repository();
    let result = support::loans(&repo).borrow("u1", "missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(repo.loans.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_borrow_without_copies_is_unavailable() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();

    loans.borrow("u1", &book.id).await.unwrap();
    let result = loans.borrow("u2", &book.id).await;
    assert!(matches!(result, Err(AppError::Unavailable(_))));

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 0);
    assert_eq!(repo.loans.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_borrow_again_after_return() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let student = actor("u1", UserRole::Student);

    let first = assert_ok!(loans.borrow("u1", &book.id).await);
    assert_ok!(loans.return_loan(&first.id, &student).await);
    let second = assert_ok!(loans.borrow("u1", &book.id).await);

    assert_ne!(first.id, second.id);
    assert_eq!(loans.user_loans("u1", false).await.unwrap().len(), 2);
    assert_eq!(loans.user_loans("u1", true).await.unwrap()[0].id, second.id);
}

#[tokio::test]
async fn test_return_by_other_student_is_forbidden() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let loan = loans.borrow("u1", &book.id).await.unwrap();

    let result = loans
        .return_loan(&loan.id, &actor("u2", UserRole::Student))
        .await;
    assert!(matches!(result, Err(AppError::Authorization(_))));

    let stored = repo.loans.find_by_id(&loan.id).await.unwrap().unwrap();
    assert!(stored.is_active());
    let book = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(book.available_copies, 0);
}

#[tokio::test]
async fn test_librarian_may_return_any_loan() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let loan = loans.borrow("u1", &book.id).await.unwrap();

    let returned = loans
        .return_loan(&loan.id, &actor("staff", UserRole::Librarian))
        .await
        .unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
}

#[tokio::test]
async fn test_second_return_is_invalid_state() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let loan = loans.borrow("u1", &book.id).await.unwrap();
    let student = actor("u1", UserRole::Student);

    assert_ok!(loans.return_loan(&loan.id, &student).await);
    let error = assert_err!(loans.return_loan(&loan.id, &student).await);
    assert!(matches!(error, AppError::InvalidState(_)));

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 1);
}

#[tokio::test]
async fn test_return_unknown_loan_is_not_found() {
    let repo = support::repository();
    let result = support::loans(&repo)
        .return_loan("missing", &actor("u1", UserRole::Librarian))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_return_after_book_deleted() {
    let repo = support::repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let loan = loans.borrow("u1", &book.id).await.unwrap();
    repo.books.delete(&book.id).await.unwrap();

    let returned = loans
        .return_loan(&loan.id, &actor("u1", UserRole::Student))
        .await
        .unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(repo.books.find_by_id(&book.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_borrows_of_last_copy() {
    let repo = support::yielding_repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();

    let (first, second) = tokio::join!(loans.borrow("u1", &book.id), loans.borrow("u2", &book.id));

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::Unavailable(_)))));

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 0);
    assert!(!stored.available);
    assert_eq!(repo.loans.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_borrows_by_many_users_never_oversell() {
    let repo = support::yielding_repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 3)).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..6 {
        let loans = loans.clone();
        let book_id = book.id.clone();
        tasks.spawn(async move { loans.borrow(&format!("user-{}", i), &book_id).await });
    }

    let mut borrowed = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => borrowed += 1,
            Err(AppError::Unavailable(_)) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(borrowed, 3);
    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 0);
}

#[tokio::test]
async fn test_concurrent_borrows_by_same_user() {
    let repo = support::yielding_repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 5)).await.unwrap();

    let (first, second) = tokio::join!(loans.borrow("u1", &book.id), loans.borrow("u1", &book.id));

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(AppError::Conflict(_)))));

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 4);
    assert_eq!(loans.user_loans("u1", true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_returns_increment_once() {
    let repo = support::yielding_repository();
    let loans = support::loans(&repo);
    let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
    let loan = loans.borrow("u1", &book.id).await.unwrap();
    let student = actor("u1", UserRole::Student);
    let librarian = actor("staff", UserRole::Librarian);

    let (first, second) = tokio::join!(
        loans.return_loan(&loan.id, &student),
        loans.return_loan(&loan.id, &librarian)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::InvalidState(_)))));

    let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 1);
    assert!(stored.available);
}

fn retitle() -> UpdateBook {
    UpdateBook {
        title: Some("Clean Code (annotated)".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_catalog_edit_racing_borrow_keeps_decrement() {
    for delay in DELAYS {
        let repo = support::yielding_repository();
        let loans = support::loans(&repo);
        let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();

        let (edited, borrowed) = tokio::join!(
            async {
                support::yields(delay).await;
                repo.books.update(&book.id, retitle()).await
            },
            loans.borrow("u1", &book.id)
        );
        assert_ok!(edited);
        assert_ok!(borrowed);

        let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(stored.available_copies, 0, "delay {delay}");
        assert_eq!(stored.title, "Clean Code (annotated)");
        assert!(matches!(
            loans.borrow("u2", &book.id).await,
            Err(AppError::Unavailable(_))
        ));
    }
}

#[tokio::test]
async fn test_catalog_edit_racing_return_keeps_increment() {
    for delay in DELAYS {
        let repo = support::yielding_repository();
        let loans = support::loans(&repo);
        let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();
        let loan = loans.borrow("u1", &book.id).await.unwrap();
        let student = actor("u1", UserRole::Student);

        let (edited, returned) = tokio::join!(
            async {
                support::yields(delay).await;
                repo.books.update(&book.id, retitle()).await
            },
            loans.return_loan(&loan.id, &student)
        );
        assert_ok!(edited);
        assert_ok!(returned);

        let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(stored.available_copies, 1, "delay {delay}");
        assert!(stored.available);
    }
}

#[tokio::test]
async fn test_shrinking_stock_racing_borrow() {
    for delay in DELAYS {
        let repo = support::yielding_repository();
        let loans = support::loans(&repo);
        let book = repo.books.create(support::new_book(CLEAN_CODE, 2)).await.unwrap();

        let (edited, borrowed) = tokio::join!(
            async {
                support::yields(delay).await;
                let shrink = UpdateBook {
                    total_copies: Some(1),
                    ..Default::default()
                };
                repo.books.update(&book.id, shrink).await
            },
            loans.borrow("u1", &book.id)
        );
        assert_ok!(edited);
        let loan = assert_ok!(borrowed);

        let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!((stored.total_copies, stored.available_copies), (1, 0), "delay {delay}");

        loans
            .return_loan(&loan.id, &actor("u1", UserRole::Student))
            .await
            .unwrap();
        let stored = repo.books.find_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!((stored.total_copies, stored.available_copies), (1, 1));
    }
}

#[tokio::test]
async fn test_book_delete_racing_borrow() {
    for delay in DELAYS {
        let repo = support::yielding_repository();
        let loans = support::loans(&repo);
        let book = repo.books.create(support::new_book(CLEAN_CODE, 1)).await.unwrap();

        let (deleted, borrowed) = tokio::join!(
            async {
                support::yields(delay).await;
                repo.books.delete(&book.id).await
            },
            loans.borrow("u1", &book.id)
        );
        assert!(assert_ok!(deleted));
        assert!(repo.books.find_by_id(&book.id).await.unwrap().is_none());
        assert!(repo.books.find_by_isbn(CLEAN_CODE).await.unwrap().is_none());

        match borrowed {
            Ok(loan) => {
                loans
                    .return_loan(&loan.id, &actor("u1", UserRole::Student))
                    .await
                    .unwrap();
                assert!(
                    repo.books.find_by_id(&book.id).await.unwrap().is_none(),
                    "delay {delay}: return resurrected the book"
                );
            }
            Err(AppError::NotFound(_)) => {
                assert!(repo.loans.find_all().await.unwrap().is_empty());
            }
            Err(other) => panic!("delay {delay}: unexpected failure: {other}"),
        }
    }
}
