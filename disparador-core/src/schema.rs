use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    profiles (id) {
        id -> Uuid,
        email -> Text,
        is_admin -> Bool,
        unique_id -> Text,
        webhook_url -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    whatsapp_instances (id) {
        id -> Uuid,
        user_id -> Uuid,
        name -> Text,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    dispatches (id) {
        id -> Uuid,
        user_id -> Uuid,
        instance_id -> Uuid,
        total_contacts -> Integer,
        is_ai_dispatch -> Bool,
        initial_message -> Text,
        ai_context -> Nullable<Text>,
        success_count -> Integer,
        error_count -> Integer,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    dispatch_contacts (id) {
        id -> Uuid,
        dispatch_id -> Uuid,
        contact_name -> Text,
        contact_phone -> Text,
        status -> Text,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

joinable!(dispatch_contacts -> dispatches (dispatch_id));

allow_tables_to_appear_in_same_query!(
    profiles,
    whatsapp_instances,
    dispatches,
    dispatch_contacts,
);
