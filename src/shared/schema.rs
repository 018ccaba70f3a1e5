diesel::table! {
    queue_tickets (id) {
        id -> Uuid,
        queue_number -> Int4,
        student_name -> Text,
        student_id -> Nullable<Text>,
        transaction_type -> Text,
        status -> Text,
        window_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        called_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    service_windows (id) {
        id -> Uuid,
        window_number -> Int4,
        is_active -> Bool,
        disabled_services -> Array<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    queue_counters (date) {
        date -> Date,
        last_number -> Int4,
    }
}

diesel::table! {
    queue_feedback (id) {
        id -> Uuid,
        queue_id -> Uuid,
        rating -> Int4,
        comment -> Nullable<Text>,
        sentiment -> Nullable<Text>,
        sentiment_score -> Nullable<Float8>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(queue_tickets -> service_windows (window_id));
diesel::joinable!(queue_feedback -> queue_tickets (queue_id));

diesel::allow_tables_to_appear_in_same_query!(
    queue_tickets,
    service_windows,
    queue_counters,
    queue_feedback,
);
