// Kept in step with the statements in `migrations.rs`, which own the DDL.

diesel::table! {
    time_entries (id) {
        id -> Integer,
        project_name -> Text,
        start_time -> TimestamptzSqlite,
        end_time -> Nullable<TimestamptzSqlite>,
        description -> Nullable<Text>,
        hourly_rate -> Nullable<Double>,
        milestone_name -> Nullable<Text>,
    }
}

diesel::table! {
    milestones (id) {
        id -> Integer,
        project_name -> Text,
        name -> Text,
        start_time -> TimestamptzSqlite,
        end_time -> Nullable<TimestamptzSqlite>,
    }
}

diesel::table! {
    settings (key) {
        key -> Text,
        value -> Text,
        updated_at -> TimestamptzSqlite,
    }
}

diesel::allow_tables_to_appear_in_same_query!(milestones, settings, time_entries,);
