//! Static per-entity field mapping between relational payloads and documents

use super::document::Document;
use crate::error::Result;
use crate::models::{
    Entity, ErrorLog, Exercise, MuscleStatus, Notification, PlannedWorkout, RecoveryLog, SleepLog,
    SyncTable, UserProfile, UserSettings, Workout, WorkoutTemplate,
};

/// Two-way mapping between an entity payload and camelCase document fields
pub(super) trait DocumentMapping: Sized {
    fn write_fields(&self, doc: &mut Document);
    fn read_fields(doc: &Document) -> Result<Self>;
}

impl DocumentMapping for Workout {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("name", self.name.as_str());
        doc.put("startedAt", self.started_at);
        doc.put_opt("completedAt", self.completed_at);
        doc.put_opt("durationSeconds", self.duration_seconds);
        doc.put_opt("caloriesBurned", self.calories_burned);
        doc.put_opt("notes", self.notes.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            name: doc.text("name")?,
            started_at: doc.timestamp("startedAt")?,
            completed_at: doc.opt_timestamp("completedAt")?,
            duration_seconds: doc.opt_int("durationSeconds")?,
            calories_burned: doc.opt_float("caloriesBurned")?,
            notes: doc.opt_text("notes")?,
        })
    }
}

impl DocumentMapping for Exercise {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("name", self.name.as_str());
        doc.put("muscleGroup", self.muscle_group.as_str());
        doc.put_opt("equipment", self.equipment.clone());
        doc.put_opt("category", self.category.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            name: doc.text("name")?,
            muscle_group: doc.text("muscleGroup")?,
            equipment: doc.opt_text("equipment")?,
            category: doc.opt_text("category")?,
        })
    }
}

impl DocumentMapping for WorkoutTemplate {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("name", self.name.as_str());
        doc.put_opt("description", self.description.clone());
        doc.put("exerciseIds", self.exercise_ids.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            name: doc.text("name")?,
            description: doc.opt_text("description")?,
            exercise_ids: doc.text_list("exerciseIds")?,
        })
    }
}

impl DocumentMapping for PlannedWorkout {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("name", self.name.as_str());
        doc.put("scheduledDate", self.scheduled_date);
        doc.put_opt("templateId", self.template_id.clone());
        doc.put("completed", self.completed);
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            name: doc.text("name")?,
            scheduled_date: doc.date("scheduledDate")?,
            template_id: doc.opt_text("templateId")?,
            completed: doc.flag("completed")?,
        })
    }
}

impl DocumentMapping for MuscleStatus {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("muscleGroup", self.muscle_group.as_str());
        doc.put("recoveryPercentage", self.recovery_percentage);
        doc.put_opt("lastWorkedAt", self.last_worked_at);
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            muscle_group: doc.text("muscleGroup")?,
            recovery_percentage: doc.float("recoveryPercentage")?,
            last_worked_at: doc.opt_timestamp("lastWorkedAt")?,
        })
    }
}

impl DocumentMapping for UserProfile {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("displayName", self.display_name.as_str());
        doc.put_opt("weightKg", self.weight_kg);
        doc.put_opt("heightCm", self.height_cm);
        doc.put_opt("fitnessGoal", self.fitness_goal.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            display_name: doc.text("displayName")?,
            weight_kg: doc.opt_float("weightKg")?,
            height_cm: doc.opt_float("heightCm")?,
            fitness_goal: doc.opt_text("fitnessGoal")?,
        })
    }
}

impl DocumentMapping for UserSettings {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("units", self.units.as_str());
        doc.put("restTimerSeconds", self.rest_timer_seconds);
        doc.put("notificationsEnabled", self.notifications_enabled);
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            units: doc.text("units")?,
            rest_timer_seconds: doc.int("restTimerSeconds")?,
            notifications_enabled: doc.flag("notificationsEnabled")?,
        })
    }
}

impl DocumentMapping for Notification {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("title", self.title.as_str());
        doc.put("body", self.body.as_str());
        doc.put_opt("scheduledAt", self.scheduled_at);
        doc.put("read", self.read);
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            title: doc.text("title")?,
            body: doc.text("body")?,
            scheduled_at: doc.opt_timestamp("scheduledAt")?,
            read: doc.flag("read")?,
        })
    }
}

impl DocumentMapping for SleepLog {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("date", self.date);
        doc.put("hours", self.hours);
        doc.put_opt("quality", self.quality);
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            date: doc.date("date")?,
            hours: doc.float("hours")?,
            quality: doc.opt_int("quality")?,
        })
    }
}

impl DocumentMapping for RecoveryLog {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("date", self.date);
        doc.put("score", self.score);
        doc.put_opt("notes", self.notes.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            date: doc.date("date")?,
            score: doc.float("score")?,
            notes: doc.opt_text("notes")?,
        })
    }
}

impl DocumentMapping for ErrorLog {
    fn write_fields(&self, doc: &mut Document) {
        doc.put("message", self.message.as_str());
        doc.put("occurredAt", self.occurred_at);
        doc.put_opt("context", self.context.clone());
    }

    fn read_fields(doc: &Document) -> Result<Self> {
        Ok(Self {
            message: doc.text("message")?,
            occurred_at: doc.timestamp("occurredAt")?,
            context: doc.opt_text("context")?,
        })
    }
}

pub(super) fn write_entity(entity: &Entity, doc: &mut Document) {
    match entity {
        Entity::Workout(value) => value.write_fields(doc),
        Entity::Exercise(value) => value.write_fields(doc),
        Entity::WorkoutTemplate(value) => value.write_fields(doc),
        Entity::PlannedWorkout(value) => value.write_fields(doc),
        Entity::MuscleStatus(value) => value.write_fields(doc),
        Entity::UserProfile(value) => value.write_fields(doc),
        Entity::Settings(value) => value.write_fields(doc),
        Entity::Notification(value) => value.write_fields(doc),
        Entity::SleepLog(value) => value.write_fields(doc),
        Entity::RecoveryLog(value) => value.write_fields(doc),
        Entity::ErrorLog(value) => value.write_fields(doc),
    }
}

pub(super) fn read_entity(table: SyncTable, doc: &Document) -> Result<Entity> {
    Ok(match table {
        SyncTable::Workouts => Entity::Workout(Workout::read_fields(doc)?),
        SyncTable::Exercises => Entity::Exercise(Exercise::read_fields(doc)?),
        SyncTable::WorkoutTemplates => Entity::WorkoutTemplate(WorkoutTemplate::read_fields(doc)?),
        SyncTable::PlannedWorkouts => Entity::PlannedWorkout(PlannedWorkout::read_fields(doc)?),
        SyncTable::MuscleStatuses => Entity::MuscleStatus(MuscleStatus::read_fields(doc)?),
        SyncTable::UserProfiles => Entity::UserProfile(UserProfile::read_fields(doc)?),
        SyncTable::Settings => Entity::Settings(UserSettings::read_fields(doc)?),
        SyncTable::Notifications => Entity::Notification(Notification::read_fields(doc)?),
        SyncTable::SleepLogs => Entity::SleepLog(SleepLog::read_fields(doc)?),
        SyncTable::RecoveryLogs => Entity::RecoveryLog(RecoveryLog::read_fields(doc)?),
        SyncTable::ErrorLogs => Entity::ErrorLog(ErrorLog::read_fields(doc)?),
    })
}
