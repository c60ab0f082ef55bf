pub mod count_reconciler;
