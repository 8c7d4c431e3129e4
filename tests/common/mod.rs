#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use elearn_portal::{
    AppState,
    auth::AuthUser,
    config::AppConfig,
    error::{ApiError, ApiResult},
    models::{
        Course, Homework, HomeworkInstance, InstanceComment, InstanceMark, Lecture, NewUser, Role,
        User, UserChanges,
    },
    policy::Scope,
    repository::Repository,
    storage::MockStorageService,
};

// --- In-Memory Repository ---

// Handlers depend on the Repository trait, so the integration tests drive
// them against this in-memory implementation. It mirrors the Postgres
// behavior the handlers rely on: uniqueness conflicts on insert, scope
// pre-filtering on lists, child-first cascades on delete.

#[derive(Default)]
struct Store {
    // User record plus stored password hash.
    users: HashMap<Uuid, (User, String)>,
    courses: HashMap<Uuid, Course>,
    lectures: HashMap<Uuid, Lecture>,
    homeworks: HashMap<Uuid, Homework>,
    instances: HashMap<Uuid, HomeworkInstance>,
    // Keyed by instance id (one-to-one).
    marks: HashMap<Uuid, InstanceMark>,
    comments: HashMap<Uuid, InstanceComment>,
}

impl Store {
    fn course_for_lecture(&self, lecture_id: Uuid) -> Option<&Course> {
        let lecture = self.lectures.get(&lecture_id)?;
        self.courses.get(&lecture.course_id)
    }

    fn course_for_homework(&self, homework_id: Uuid) -> Option<&Course> {
        let homework = self.homeworks.get(&homework_id)?;
        self.course_for_lecture(homework.lecture_id)
    }

    fn course_for_instance(&self, instance_id: Uuid) -> Option<&Course> {
        let instance = self.instances.get(&instance_id)?;
        self.course_for_homework(instance.homework_id)
    }

    fn remove_instance_tree(&mut self, instance_id: Uuid) {
        self.marks.remove(&instance_id);
        self.comments
            .retain(|_, comment| comment.instance_id != instance_id);
        self.instances.remove(&instance_id);
    }

    fn remove_homework_tree(&mut self, homework_id: Uuid) {
        let instance_ids: Vec<Uuid> = self
            .instances
            .values()
            .filter(|instance| instance.homework_id == homework_id)
            .map(|instance| instance.id)
            .collect();
        for id in instance_ids {
            self.remove_instance_tree(id);
        }
        self.homeworks.remove(&homework_id);
    }

    fn remove_lecture_tree(&mut self, lecture_id: Uuid) {
        let homework_ids: Vec<Uuid> = self
            .homeworks
            .values()
            .filter(|homework| homework.lecture_id == lecture_id)
            .map(|homework| homework.id)
            .collect();
        for id in homework_ids {
            self.remove_homework_tree(id);
        }
        self.lectures.remove(&lecture_id);
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test seeding shortcut: inserts a user directly, bypassing the API
    /// (this is how superusers come to exist in production too).
    pub fn seed_user(&self, role: Role, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            role,
        };
        self.inner
            .lock()
            .unwrap()
            .users
            .insert(user.id, (user.clone(), "seeded-hash".to_string()));
        user
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    // --- Users ---

    async fn create_user(&self, user: NewUser) -> ApiResult<User> {
        let mut store = self.inner.lock().unwrap();
        if store.users.values().any(|(u, _)| u.email == user.email) {
            return Err(ApiError::Conflict("email is already registered"));
        }
        let record = User {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
        };
        store
            .users
            .insert(record.id, (record.clone(), user.password_hash));
        Ok(record)
    }

    async fn get_user(&self, id: Uuid) -> ApiResult<Option<User>> {
        let store = self.inner.lock().unwrap();
        Ok(store.users.get(&id).map(|(user, _)| user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .users
            .values()
            .find(|(user, _)| user.email == email)
            .map(|(user, _)| user.clone()))
    }

    async fn get_users_by_ids(&self, ids: &[Uuid]) -> ApiResult<Vec<User>> {
        let store = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| store.users.get(id).map(|(user, _)| user.clone()))
            .collect())
    }

    async fn list_users(&self) -> ApiResult<Vec<User>> {
        let store = self.inner.lock().unwrap();
        let mut users: Vec<User> = store.users.values().map(|(user, _)| user.clone()).collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> ApiResult<Option<User>> {
        let mut store = self.inner.lock().unwrap();
        if let Some(email) = &changes.email {
            if store
                .users
                .values()
                .any(|(user, _)| user.email == *email && user.id != id)
            {
                return Err(ApiError::Conflict("email is already registered"));
            }
        }
        let Some((user, hash)) = store.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(password_hash) = changes.password_hash {
            *hash = password_hash;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        let owned: Vec<Uuid> = store
            .instances
            .values()
            .filter(|instance| instance.student_id == id)
            .map(|instance| instance.id)
            .collect();
        for instance_id in owned {
            store.remove_instance_tree(instance_id);
        }
        store.comments.retain(|_, comment| comment.author_id != id);
        for course in store.courses.values_mut() {
            course.teachers.retain(|member| *member != id);
            course.students.retain(|member| *member != id);
        }
        Ok(store.users.remove(&id).is_some())
    }

    async fn get_password_hash(&self, user_id: Uuid) -> ApiResult<Option<String>> {
        let store = self.inner.lock().unwrap();
        Ok(store.users.get(&user_id).map(|(_, hash)| hash.clone()))
    }

    // --- Courses ---

    async fn create_course(
        &self,
        id: Uuid,
        title: &str,
        teachers: &[Uuid],
        students: &[Uuid],
    ) -> ApiResult<Course> {
        let mut store = self.inner.lock().unwrap();
        if store.courses.values().any(|course| course.title == title) {
            return Err(ApiError::Conflict("a course with this title already exists"));
        }
        let course = Course {
            id,
            title: title.to_string(),
            teachers: teachers.to_vec(),
            students: students.to_vec(),
        };
        store.courses.insert(id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, id: Uuid) -> ApiResult<Option<Course>> {
        let store = self.inner.lock().unwrap();
        Ok(store.courses.get(&id).cloned())
    }

    async fn list_courses(&self, scope: Scope) -> ApiResult<Vec<Course>> {
        let store = self.inner.lock().unwrap();
        let mut courses: Vec<Course> = store
            .courses
            .values()
            .filter(|course| scope.permits_course(course))
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(courses)
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        teachers: Option<&[Uuid]>,
        students: Option<&[Uuid]>,
    ) -> ApiResult<Option<Course>> {
        let mut store = self.inner.lock().unwrap();
        if let Some(title) = title {
            if store
                .courses
                .values()
                .any(|course| course.title == title && course.id != id)
            {
                return Err(ApiError::Conflict("a course with this title already exists"));
            }
        }
        let Some(course) = store.courses.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = title {
            course.title = title.to_string();
        }
        if let Some(teachers) = teachers {
            course.teachers = teachers.to_vec();
        }
        if let Some(students) = students {
            course.students = students.to_vec();
        }
        Ok(Some(course.clone()))
    }

    async fn delete_course(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        let lecture_ids: Vec<Uuid> = store
            .lectures
            .values()
            .filter(|lecture| lecture.course_id == id)
            .map(|lecture| lecture.id)
            .collect();
        for lecture_id in lecture_ids {
            store.remove_lecture_tree(lecture_id);
        }
        Ok(store.courses.remove(&id).is_some())
    }

    async fn course_title_exists(&self, title: &str, exclude: Option<Uuid>) -> ApiResult<bool> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .courses
            .values()
            .any(|course| course.title == title && Some(course.id) != exclude))
    }

    // --- Lectures ---

    async fn create_lecture(
        &self,
        id: Uuid,
        course_id: Uuid,
        title: &str,
        file_key: &str,
    ) -> ApiResult<Lecture> {
        let mut store = self.inner.lock().unwrap();
        if store
            .lectures
            .values()
            .any(|lecture| lecture.course_id == course_id && lecture.title == title)
        {
            return Err(ApiError::Conflict(
                "a lecture with this title already exists in the course",
            ));
        }
        let lecture = Lecture {
            id,
            course_id,
            title: title.to_string(),
            file_key: file_key.to_string(),
        };
        store.lectures.insert(id, lecture.clone());
        Ok(lecture)
    }

    async fn get_lecture(&self, id: Uuid) -> ApiResult<Option<Lecture>> {
        let store = self.inner.lock().unwrap();
        Ok(store.lectures.get(&id).cloned())
    }

    async fn list_lectures(&self, scope: Scope, course_id: Option<Uuid>) -> ApiResult<Vec<Lecture>> {
        let store = self.inner.lock().unwrap();
        let mut lectures: Vec<Lecture> = store
            .lectures
            .values()
            .filter(|lecture| course_id.is_none_or(|course| lecture.course_id == course))
            .filter(|lecture| {
                store
                    .courses
                    .get(&lecture.course_id)
                    .is_some_and(|course| scope.permits_course(course))
            })
            .cloned()
            .collect();
        lectures.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(lectures)
    }

    async fn update_lecture(
        &self,
        id: Uuid,
        title: Option<&str>,
        file_key: Option<&str>,
    ) -> ApiResult<Option<Lecture>> {
        let mut store = self.inner.lock().unwrap();
        let Some(current) = store.lectures.get(&id).cloned() else {
            return Ok(None);
        };
        if let Some(title) = title {
            if store.lectures.values().any(|lecture| {
                lecture.course_id == current.course_id && lecture.title == title && lecture.id != id
            }) {
                return Err(ApiError::Conflict(
                    "a lecture with this title already exists in the course",
                ));
            }
        }
        let lecture = store.lectures.get_mut(&id).unwrap();
        if let Some(title) = title {
            lecture.title = title.to_string();
        }
        if let Some(file_key) = file_key {
            lecture.file_key = file_key.to_string();
        }
        Ok(Some(lecture.clone()))
    }

    async fn delete_lecture(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        let existed = store.lectures.contains_key(&id);
        store.remove_lecture_tree(id);
        Ok(existed)
    }

    async fn lecture_title_exists(
        &self,
        course_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool> {
        let store = self.inner.lock().unwrap();
        Ok(store.lectures.values().any(|lecture| {
            lecture.course_id == course_id && lecture.title == title && Some(lecture.id) != exclude
        }))
    }

    // --- Homeworks ---

    async fn create_homework(
        &self,
        id: Uuid,
        lecture_id: Uuid,
        title: &str,
        text: &str,
    ) -> ApiResult<Homework> {
        let mut store = self.inner.lock().unwrap();
        if store
            .homeworks
            .values()
            .any(|homework| homework.lecture_id == lecture_id && homework.title == title)
        {
            return Err(ApiError::Conflict(
                "a homework with this title already exists in the lecture",
            ));
        }
        let homework = Homework {
            id,
            lecture_id,
            title: title.to_string(),
            text: text.to_string(),
        };
        store.homeworks.insert(id, homework.clone());
        Ok(homework)
    }

    async fn get_homework(&self, id: Uuid) -> ApiResult<Option<Homework>> {
        let store = self.inner.lock().unwrap();
        Ok(store.homeworks.get(&id).cloned())
    }

    async fn list_homeworks(
        &self,
        scope: Scope,
        lecture_id: Option<Uuid>,
    ) -> ApiResult<Vec<Homework>> {
        let store = self.inner.lock().unwrap();
        let mut homeworks: Vec<Homework> = store
            .homeworks
            .values()
            .filter(|homework| lecture_id.is_none_or(|lecture| homework.lecture_id == lecture))
            .filter(|homework| {
                store
                    .course_for_lecture(homework.lecture_id)
                    .is_some_and(|course| scope.permits_course(course))
            })
            .cloned()
            .collect();
        homeworks.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(homeworks)
    }

    async fn update_homework(
        &self,
        id: Uuid,
        title: Option<&str>,
        text: Option<&str>,
    ) -> ApiResult<Option<Homework>> {
        let mut store = self.inner.lock().unwrap();
        let Some(current) = store.homeworks.get(&id).cloned() else {
            return Ok(None);
        };
        if let Some(title) = title {
            if store.homeworks.values().any(|homework| {
                homework.lecture_id == current.lecture_id
                    && homework.title == title
                    && homework.id != id
            }) {
                return Err(ApiError::Conflict(
                    "a homework with this title already exists in the lecture",
                ));
            }
        }
        let homework = store.homeworks.get_mut(&id).unwrap();
        if let Some(title) = title {
            homework.title = title.to_string();
        }
        if let Some(text) = text {
            homework.text = text.to_string();
        }
        Ok(Some(homework.clone()))
    }

    async fn delete_homework(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        let existed = store.homeworks.contains_key(&id);
        store.remove_homework_tree(id);
        Ok(existed)
    }

    async fn homework_title_exists(
        &self,
        lecture_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool> {
        let store = self.inner.lock().unwrap();
        Ok(store.homeworks.values().any(|homework| {
            homework.lecture_id == lecture_id
                && homework.title == title
                && Some(homework.id) != exclude
        }))
    }

    // --- Homework instances ---

    async fn create_instance(
        &self,
        id: Uuid,
        homework_id: Uuid,
        student_id: Uuid,
        uploaded_work: Option<&str>,
    ) -> ApiResult<HomeworkInstance> {
        let mut store = self.inner.lock().unwrap();
        // The composite unique constraint.
        if store
            .instances
            .values()
            .any(|instance| instance.homework_id == homework_id && instance.student_id == student_id)
        {
            return Err(ApiError::Conflict(
                "a homework instance already exists for this student",
            ));
        }
        let instance = HomeworkInstance {
            id,
            homework_id,
            student_id,
            uploaded_work: uploaded_work.map(str::to_string),
            is_done: false,
        };
        store.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: Uuid) -> ApiResult<Option<HomeworkInstance>> {
        let store = self.inner.lock().unwrap();
        Ok(store.instances.get(&id).cloned())
    }

    async fn list_instances(
        &self,
        scope: Scope,
        homework_id: Option<Uuid>,
    ) -> ApiResult<Vec<HomeworkInstance>> {
        let store = self.inner.lock().unwrap();
        let mut instances: Vec<HomeworkInstance> = store
            .instances
            .values()
            .filter(|instance| homework_id.is_none_or(|homework| instance.homework_id == homework))
            .filter(|instance| {
                store
                    .course_for_homework(instance.homework_id)
                    .is_some_and(|course| scope.permits_instance(course, instance.student_id))
            })
            .cloned()
            .collect();
        instances.sort_by_key(|instance| instance.id);
        Ok(instances)
    }

    async fn update_instance(
        &self,
        id: Uuid,
        uploaded_work: Option<&str>,
        is_done: Option<bool>,
    ) -> ApiResult<Option<HomeworkInstance>> {
        let mut store = self.inner.lock().unwrap();
        let Some(instance) = store.instances.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(uploaded_work) = uploaded_work {
            instance.uploaded_work = Some(uploaded_work.to_string());
        }
        if let Some(is_done) = is_done {
            instance.is_done = is_done;
        }
        Ok(Some(instance.clone()))
    }

    async fn delete_instance(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        let existed = store.instances.contains_key(&id);
        store.remove_instance_tree(id);
        Ok(existed)
    }

    async fn instance_exists(&self, homework_id: Uuid, student_id: Uuid) -> ApiResult<bool> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .instances
            .values()
            .any(|instance| instance.homework_id == homework_id && instance.student_id == student_id))
    }

    // --- Marks ---

    async fn create_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<InstanceMark> {
        let mut store = self.inner.lock().unwrap();
        if store.marks.contains_key(&instance_id) {
            return Err(ApiError::Conflict("this homework instance is already marked"));
        }
        let record = InstanceMark { instance_id, mark };
        store.marks.insert(instance_id, record.clone());
        Ok(record)
    }

    async fn get_mark(&self, instance_id: Uuid) -> ApiResult<Option<InstanceMark>> {
        let store = self.inner.lock().unwrap();
        Ok(store.marks.get(&instance_id).cloned())
    }

    async fn list_marks(&self, scope: Scope) -> ApiResult<Vec<InstanceMark>> {
        let store = self.inner.lock().unwrap();
        let mut marks: Vec<InstanceMark> = store
            .marks
            .values()
            .filter(|mark| {
                let Some(instance) = store.instances.get(&mark.instance_id) else {
                    return false;
                };
                store
                    .course_for_homework(instance.homework_id)
                    .is_some_and(|course| scope.permits_instance(course, instance.student_id))
            })
            .cloned()
            .collect();
        marks.sort_by_key(|mark| mark.instance_id);
        Ok(marks)
    }

    async fn update_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<Option<InstanceMark>> {
        let mut store = self.inner.lock().unwrap();
        let Some(record) = store.marks.get_mut(&instance_id) else {
            return Ok(None);
        };
        record.mark = mark;
        Ok(Some(record.clone()))
    }

    async fn delete_mark(&self, instance_id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        Ok(store.marks.remove(&instance_id).is_some())
    }

    // --- Comments ---

    async fn create_comment(
        &self,
        id: Uuid,
        instance_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> ApiResult<InstanceComment> {
        let mut store = self.inner.lock().unwrap();
        let comment = InstanceComment {
            id,
            instance_id,
            author_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        store.comments.insert(id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: Uuid) -> ApiResult<Option<InstanceComment>> {
        let store = self.inner.lock().unwrap();
        Ok(store.comments.get(&id).cloned())
    }

    async fn list_comments(&self, instance_id: Uuid) -> ApiResult<Vec<InstanceComment>> {
        let store = self.inner.lock().unwrap();
        let mut comments: Vec<InstanceComment> = store
            .comments
            .values()
            .filter(|comment| comment.instance_id == instance_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(comments)
    }

    async fn update_comment(&self, id: Uuid, body: &str) -> ApiResult<Option<InstanceComment>> {
        let mut store = self.inner.lock().unwrap();
        let Some(comment) = store.comments.get_mut(&id) else {
            return Ok(None);
        };
        comment.body = body.to_string();
        Ok(Some(comment.clone()))
    }

    async fn delete_comment(&self, id: Uuid) -> ApiResult<bool> {
        let mut store = self.inner.lock().unwrap();
        Ok(store.comments.remove(&id).is_some())
    }
}

// --- Test Utilities ---

/// Creates an AppState over a shared in-memory repository and mock storage.
pub fn create_test_state(repo: Arc<InMemoryRepository>) -> AppState {
    AppState {
        repo,
        storage: Arc::new(MockStorageService::new()),
        config: AppConfig::default(),
    }
}

pub fn auth_user(user: &User) -> AuthUser {
    AuthUser {
        id: user.id,
        role: user.role,
    }
}
