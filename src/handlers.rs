use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{self, AuthUser},
    error::{ApiError, ApiResult},
    models::{
        Course, CreateCommentRequest, CreateCourseRequest, CreateHomeworkRequest,
        CreateInstanceRequest, CreateLectureRequest, Homework, HomeworkInstance, InstanceComment,
        InstanceMark, Lecture, LoginRequest, LoginResponse, NewUser, PresignedUrlRequest,
        PresignedUrlResponse, RegisterUserRequest, Role, SetMarkRequest, UpdateCommentRequest,
        UpdateCourseRequest, UpdateHomeworkRequest, UpdateInstanceRequest, UpdateLectureRequest,
        UpdateUserRequest, User, UserChanges,
    },
    policy::{self, Action, Ancestry, Resource},
    repository::RepositoryState,
    validate,
};

// --- Filter Structs ---

/// LectureFilter
///
/// Accepted query parameters for the lecture listing endpoint.
#[derive(Deserialize)]
pub struct LectureFilter {
    pub course_id: Option<Uuid>,
}

/// HomeworkFilter
#[derive(Deserialize)]
pub struct HomeworkFilter {
    pub lecture_id: Option<Uuid>,
}

/// InstanceFilter
#[derive(Deserialize)]
pub struct InstanceFilter {
    pub homework_id: Option<Uuid>,
}

// --- Shared Orchestration Helpers ---

/// Every denial surfaces to the caller as the same generic error; the
/// resource/action detail goes to the debug log only.
fn forbid(deny: policy::Deny) -> ApiError {
    tracing::debug!(resource = ?deny.resource, action = ?deny.action, "action denied");
    ApiError::Forbidden
}

fn require_superuser(user: &AuthUser) -> ApiResult<()> {
    if user.role == Role::Superuser {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

// Ancestor resolution: each step is a single key lookup up the ownership
// chain. A missing link anywhere surfaces as NotFound before any policy or
// validation detail is produced.

async fn course_for_lecture(repo: &RepositoryState, lecture: &Lecture) -> ApiResult<Course> {
    repo.get_course(lecture.course_id)
        .await?
        .ok_or(ApiError::NotFound("course"))
}

async fn course_for_homework(repo: &RepositoryState, homework: &Homework) -> ApiResult<Course> {
    let lecture = repo
        .get_lecture(homework.lecture_id)
        .await?
        .ok_or(ApiError::NotFound("lecture"))?;
    course_for_lecture(repo, &lecture).await
}

async fn course_for_instance(
    repo: &RepositoryState,
    instance: &HomeworkInstance,
) -> ApiResult<Course> {
    let homework = repo
        .get_homework(instance.homework_id)
        .await?
        .ok_or(ApiError::NotFound("homework"))?;
    course_for_homework(repo, &homework).await
}

// --- Identity & Session Handlers ---

/// register_user
///
/// [Public Route] Creates a teacher or student account. Requests for the
/// superuser role are rejected during validation; superusers are seeded
/// directly in storage.
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    validate::validate_register(&payload)?;

    let password_hash = auth::hash_password(&payload.password)?;
    let user = state
        .repo
        .create_user(NewUser {
            id: Uuid::new_v4(),
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            role: payload.role,
            password_hash,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// login
///
/// [Public Route] Exchanges email+password for a signed session token.
/// Unknown email and wrong password are indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = state
        .repo
        .get_user_by_email(&payload.email)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let hash = state
        .repo
        .get_password_hash(user.id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    if !auth::verify_password(&payload.password, &hash) {
        return Err(ApiError::Unauthenticated);
    }

    let token = auth::issue_token(user.id, &state.config.jwt_secret)?;
    Ok(Json(LoginResponse { token, user }))
}

/// get_me
///
/// [Authenticated Route] The caller's own profile record.
pub async fn get_me(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<User>> {
    state
        .repo
        .get_user(user.id)
        .await?
        .map(Json)
        .ok_or(ApiError::Unauthenticated)
}

// --- Admin User Handlers ---

/// list_users
///
/// [Admin Route] All user records. Superuser only.
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<User>>> {
    require_superuser(&user)?;
    Ok(Json(state.repo.list_users().await?))
}

/// create_user
///
/// [Admin Route] Creates a user with any non-superuser role.
pub async fn create_user(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    require_superuser(&user)?;
    register_user(State(state), Json(payload)).await
}

/// get_user
///
/// [Admin Route]
pub async fn get_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    require_superuser(&user)?;
    state
        .repo
        .get_user(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("user"))
}

/// update_user
///
/// [Admin Route] Partial update; a supplied password is re-hashed before it
/// reaches the repository.
pub async fn update_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    require_superuser(&user)?;
    validate::validate_user_update(&payload)?;

    let password_hash = match &payload.password {
        Some(password) => Some(auth::hash_password(password)?),
        None => None,
    };

    state
        .repo
        .update_user(
            id,
            UserChanges {
                email: payload.email,
                first_name: payload.first_name,
                last_name: payload.last_name,
                password_hash,
                role: payload.role,
            },
        )
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("user"))
}

/// delete_user
///
/// [Admin Route] Removes the user and everything reachable from them.
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_superuser(&user)?;
    if state.repo.delete_user(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("user"))
    }
}

// --- Course Handlers ---

/// create_course
///
/// [Authenticated Route] Teachers only. Referenced teachers/students are
/// resolved and role-checked as a batch; the creator is always added to the
/// teacher set, so a fresh course never has an empty one.
pub async fn create_course(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCourseRequest>,
) -> ApiResult<(StatusCode, Json<Course>)> {
    policy::check(user.principal(), Action::Create, Resource::Course, None).map_err(forbid)?;

    let teachers = state.repo.get_users_by_ids(&payload.teachers).await?;
    let students = state.repo.get_users_by_ids(&payload.students).await?;
    validate::validate_course_create(&payload, &teachers, &students)?;

    if state.repo.course_title_exists(&payload.title, None).await? {
        return Err(ApiError::Conflict("a course with this title already exists"));
    }

    let mut teacher_set: BTreeSet<Uuid> = payload.teachers.iter().copied().collect();
    teacher_set.insert(user.id);
    let student_set: BTreeSet<Uuid> = payload.students.iter().copied().collect();

    let course = state
        .repo
        .create_course(
            Uuid::new_v4(),
            &payload.title,
            &teacher_set.into_iter().collect::<Vec<_>>(),
            &student_set.into_iter().collect::<Vec<_>>(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(course)))
}

/// list_courses
///
/// [Authenticated Route] Courses visible to the caller: all for superusers,
/// owned for teachers, enrolled for students. The scope is part of the
/// query, never filtered after the fact.
pub async fn list_courses(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Course>>> {
    let scope = policy::scope_filter(user.principal());
    Ok(Json(state.repo.list_courses(scope).await?))
}

/// get_course
///
/// [Authenticated Route]
pub async fn get_course(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Course>> {
    let course = state
        .repo
        .get_course(id)
        .await?
        .ok_or(ApiError::NotFound("course"))?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Retrieve, Resource::Course, Some(&ancestry))
        .map_err(forbid)?;

    Ok(Json(course))
}

/// update_course
///
/// [Authenticated Route] Owning teachers only. Replacement membership sets
/// are re-validated like a create batch and must keep at least one teacher.
pub async fn update_course(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCourseRequest>,
) -> ApiResult<Json<Course>> {
    let course = state
        .repo
        .get_course(id)
        .await?
        .ok_or(ApiError::NotFound("course"))?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Update, Resource::Course, Some(&ancestry))
        .map_err(forbid)?;

    let teachers = match &payload.teachers {
        Some(ids) => Some(state.repo.get_users_by_ids(ids).await?),
        None => None,
    };
    let students = match &payload.students {
        Some(ids) => Some(state.repo.get_users_by_ids(ids).await?),
        None => None,
    };
    validate::validate_course_update(&payload, teachers.as_deref(), students.as_deref())?;

    if let Some(title) = &payload.title {
        if state.repo.course_title_exists(title, Some(id)).await? {
            return Err(ApiError::Conflict("a course with this title already exists"));
        }
    }

    state
        .repo
        .update_course(
            id,
            payload.title.as_deref(),
            payload.teachers.as_deref(),
            payload.students.as_deref(),
        )
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("course"))
}

/// delete_course
///
/// [Authenticated Route] Owning teachers only. Deletes the whole subtree
/// (lectures, homeworks, instances, marks, comments) in one transaction.
pub async fn delete_course(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let course = state
        .repo
        .get_course(id)
        .await?
        .ok_or(ApiError::NotFound("course"))?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Delete, Resource::Course, Some(&ancestry))
        .map_err(forbid)?;

    if state.repo.delete_course(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("course"))
    }
}

// --- Lecture Handlers ---

/// create_lecture
///
/// [Authenticated Route] Teachers of the owning course only. The file must
/// already have been uploaded through the presigned flow.
pub async fn create_lecture(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateLectureRequest>,
) -> ApiResult<(StatusCode, Json<Lecture>)> {
    let course = state
        .repo
        .get_course(payload.course_id)
        .await?
        .ok_or(ApiError::NotFound("course"))?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Create, Resource::Lecture, Some(&ancestry))
        .map_err(forbid)?;

    validate::validate_lecture_create(&payload)?;

    if state
        .repo
        .lecture_title_exists(course.id, &payload.title, None)
        .await?
    {
        return Err(ApiError::Conflict(
            "a lecture with this title already exists in the course",
        ));
    }

    let lecture = state
        .repo
        .create_lecture(Uuid::new_v4(), course.id, &payload.title, &payload.file_key)
        .await?;

    Ok((StatusCode::CREATED, Json(lecture)))
}

/// list_lectures
///
/// [Authenticated Route] Scoped listing, optionally narrowed to one course.
pub async fn list_lectures(
    user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<LectureFilter>,
) -> ApiResult<Json<Vec<Lecture>>> {
    let scope = policy::scope_filter(user.principal());
    Ok(Json(state.repo.list_lectures(scope, filter.course_id).await?))
}

/// get_lecture
///
/// [Authenticated Route]
pub async fn get_lecture(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Lecture>> {
    let lecture = state
        .repo
        .get_lecture(id)
        .await?
        .ok_or(ApiError::NotFound("lecture"))?;
    let course = course_for_lecture(&state.repo, &lecture).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Retrieve, Resource::Lecture, Some(&ancestry))
        .map_err(forbid)?;

    Ok(Json(lecture))
}

/// update_lecture
///
/// [Authenticated Route] Teachers of the owning course only.
pub async fn update_lecture(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLectureRequest>,
) -> ApiResult<Json<Lecture>> {
    let lecture = state
        .repo
        .get_lecture(id)
        .await?
        .ok_or(ApiError::NotFound("lecture"))?;
    let course = course_for_lecture(&state.repo, &lecture).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Update, Resource::Lecture, Some(&ancestry))
        .map_err(forbid)?;

    validate::validate_lecture_update(&payload)?;

    if let Some(title) = &payload.title {
        if state
            .repo
            .lecture_title_exists(course.id, title, Some(id))
            .await?
        {
            return Err(ApiError::Conflict(
                "a lecture with this title already exists in the course",
            ));
        }
    }

    state
        .repo
        .update_lecture(id, payload.title.as_deref(), payload.file_key.as_deref())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("lecture"))
}

/// delete_lecture
///
/// [Authenticated Route] Teachers of the owning course only; cascades to
/// homeworks and below.
pub async fn delete_lecture(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let lecture = state
        .repo
        .get_lecture(id)
        .await?
        .ok_or(ApiError::NotFound("lecture"))?;
    let course = course_for_lecture(&state.repo, &lecture).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Delete, Resource::Lecture, Some(&ancestry))
        .map_err(forbid)?;

    if state.repo.delete_lecture(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("lecture"))
    }
}

// --- Homework Handlers ---

/// create_homework
///
/// [Authenticated Route] Teachers of the owning course only.
pub async fn create_homework(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateHomeworkRequest>,
) -> ApiResult<(StatusCode, Json<Homework>)> {
    let lecture = state
        .repo
        .get_lecture(payload.lecture_id)
        .await?
        .ok_or(ApiError::NotFound("lecture"))?;
    let course = course_for_lecture(&state.repo, &lecture).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Create, Resource::Homework, Some(&ancestry))
        .map_err(forbid)?;

    validate::validate_homework_create(&payload)?;

    if state
        .repo
        .homework_title_exists(lecture.id, &payload.title, None)
        .await?
    {
        return Err(ApiError::Conflict(
            "a homework with this title already exists in the lecture",
        ));
    }

    let homework = state
        .repo
        .create_homework(Uuid::new_v4(), lecture.id, &payload.title, &payload.text)
        .await?;

    Ok((StatusCode::CREATED, Json(homework)))
}

/// list_homeworks
///
/// [Authenticated Route] Scoped listing, optionally narrowed to one lecture.
pub async fn list_homeworks(
    user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<HomeworkFilter>,
) -> ApiResult<Json<Vec<Homework>>> {
    let scope = policy::scope_filter(user.principal());
    Ok(Json(state.repo.list_homeworks(scope, filter.lecture_id).await?))
}

/// get_homework
///
/// [Authenticated Route]
pub async fn get_homework(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Homework>> {
    let homework = state
        .repo
        .get_homework(id)
        .await?
        .ok_or(ApiError::NotFound("homework"))?;
    let course = course_for_homework(&state.repo, &homework).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Retrieve, Resource::Homework, Some(&ancestry))
        .map_err(forbid)?;

    Ok(Json(homework))
}

/// update_homework
///
/// [Authenticated Route] Teachers of the owning course only.
pub async fn update_homework(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateHomeworkRequest>,
) -> ApiResult<Json<Homework>> {
    let homework = state
        .repo
        .get_homework(id)
        .await?
        .ok_or(ApiError::NotFound("homework"))?;
    let course = course_for_homework(&state.repo, &homework).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Update, Resource::Homework, Some(&ancestry))
        .map_err(forbid)?;

    validate::validate_homework_update(&payload)?;

    if let Some(title) = &payload.title {
        if state
            .repo
            .homework_title_exists(homework.lecture_id, title, Some(id))
            .await?
        {
            return Err(ApiError::Conflict(
                "a homework with this title already exists in the lecture",
            ));
        }
    }

    state
        .repo
        .update_homework(id, payload.title.as_deref(), payload.text.as_deref())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("homework"))
}

/// delete_homework
///
/// [Authenticated Route] Teachers of the owning course only; cascades to
/// instances and below.
pub async fn delete_homework(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let homework = state
        .repo
        .get_homework(id)
        .await?
        .ok_or(ApiError::NotFound("homework"))?;
    let course = course_for_homework(&state.repo, &homework).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(user.principal(), Action::Delete, Resource::Homework, Some(&ancestry))
        .map_err(forbid)?;

    if state.repo.delete_homework(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("homework"))
    }
}

// --- Homework Instance Handlers ---

/// create_instance
///
/// [Authenticated Route] Enrolled students only. The acting student becomes
/// the owner; at most one instance per (homework, student) pair.
pub async fn create_instance(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateInstanceRequest>,
) -> ApiResult<(StatusCode, Json<HomeworkInstance>)> {
    let homework = state
        .repo
        .get_homework(payload.homework_id)
        .await?
        .ok_or(ApiError::NotFound("homework"))?;
    let course = course_for_homework(&state.repo, &homework).await?;

    let ancestry = Ancestry::course(&course);
    policy::check(
        user.principal(),
        Action::Create,
        Resource::HomeworkInstance,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    if state.repo.instance_exists(homework.id, user.id).await? {
        return Err(ApiError::Conflict(
            "a homework instance already exists for this student",
        ));
    }

    let instance = state
        .repo
        .create_instance(
            Uuid::new_v4(),
            homework.id,
            user.id,
            payload.uploaded_work.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(instance)))
}

/// list_instances
///
/// [Authenticated Route] Teachers see all submissions in their courses;
/// students see only their own.
pub async fn list_instances(
    user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> ApiResult<Json<Vec<HomeworkInstance>>> {
    let scope = policy::scope_filter(user.principal());
    Ok(Json(state.repo.list_instances(scope, filter.homework_id).await?))
}

/// get_instance
///
/// [Authenticated Route]
pub async fn get_instance(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HomeworkInstance>> {
    let instance = state
        .repo
        .get_instance(id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Retrieve,
        Resource::HomeworkInstance,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    Ok(Json(instance))
}

/// update_instance
///
/// [Authenticated Route] Only the owning student may update their
/// submission (uploaded work, done flag).
pub async fn update_instance(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateInstanceRequest>,
) -> ApiResult<Json<HomeworkInstance>> {
    let instance = state
        .repo
        .get_instance(id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Update,
        Resource::HomeworkInstance,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    state
        .repo
        .update_instance(id, payload.uploaded_work.as_deref(), payload.is_done)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("homework instance"))
}

/// delete_instance
///
/// [Authenticated Route] Superuser only; neither students nor teachers may
/// remove a submission record.
pub async fn delete_instance(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let instance = state
        .repo
        .get_instance(id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Delete,
        Resource::HomeworkInstance,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    if state.repo.delete_instance(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("homework instance"))
    }
}

// --- Mark Handlers ---

/// set_mark
///
/// [Authenticated Route] Teachers of the owning course grade a submission.
/// Marking an already-marked instance is a conflict; use update instead.
pub async fn set_mark(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    Json(payload): Json<SetMarkRequest>,
) -> ApiResult<(StatusCode, Json<InstanceMark>)> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Create,
        Resource::InstanceMark,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    validate::validate_mark(payload.mark)?;

    if state.repo.get_mark(instance.id).await?.is_some() {
        return Err(ApiError::Conflict("this homework instance is already marked"));
    }

    let mark = state.repo.create_mark(instance.id, payload.mark).await?;
    Ok((StatusCode::CREATED, Json(mark)))
}

/// get_mark
///
/// [Authenticated Route]
pub async fn get_mark(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<InstanceMark>> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Retrieve,
        Resource::InstanceMark,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    state
        .repo
        .get_mark(instance.id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("mark"))
}

/// list_marks
///
/// [Authenticated Route] All marks visible in the caller's scope.
pub async fn list_marks(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<InstanceMark>>> {
    let scope = policy::scope_filter(user.principal());
    Ok(Json(state.repo.list_marks(scope).await?))
}

/// update_mark
///
/// [Authenticated Route] Teachers of the owning course only.
pub async fn update_mark(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    Json(payload): Json<SetMarkRequest>,
) -> ApiResult<Json<InstanceMark>> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Update,
        Resource::InstanceMark,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    validate::validate_mark(payload.mark)?;

    state
        .repo
        .update_mark(instance.id, payload.mark)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("mark"))
}

/// delete_mark
///
/// [Authenticated Route] Teachers of the owning course only.
pub async fn delete_mark(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Delete,
        Resource::InstanceMark,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    if state.repo.delete_mark(instance.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("mark"))
    }
}

// --- Comment Handlers ---

/// add_comment
///
/// [Authenticated Route] The owning student, a teacher of the course, or a
/// superuser may comment on a submission. The creation timestamp comes from
/// the storage clock and is immutable.
pub async fn add_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<InstanceComment>)> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::Create,
        Resource::InstanceComment,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    validate::validate_comment_body(&payload.body)?;

    let comment = state
        .repo
        .create_comment(Uuid::new_v4(), instance.id, user.id, &payload.body)
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// list_comments
///
/// [Authenticated Route] Comments for one submission, oldest first.
pub async fn list_comments(
    user: AuthUser,
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<Vec<InstanceComment>>> {
    let instance = state
        .repo
        .get_instance(instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::instance(&course, instance.student_id);
    policy::check(
        user.principal(),
        Action::List,
        Resource::InstanceComment,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    Ok(Json(state.repo.list_comments(instance.id).await?))
}

/// update_comment
///
/// [Authenticated Route] Author only. Only the body is mutable.
pub async fn update_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCommentRequest>,
) -> ApiResult<Json<InstanceComment>> {
    let comment = state
        .repo
        .get_comment(id)
        .await?
        .ok_or(ApiError::NotFound("comment"))?;
    let instance = state
        .repo
        .get_instance(comment.instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::comment(&course, instance.student_id, comment.author_id);
    policy::check(
        user.principal(),
        Action::Update,
        Resource::InstanceComment,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    validate::validate_comment_body(&payload.body)?;

    state
        .repo
        .update_comment(id, &payload.body)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("comment"))
}

/// delete_comment
///
/// [Authenticated Route] The author, or a superuser.
pub async fn delete_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let comment = state
        .repo
        .get_comment(id)
        .await?
        .ok_or(ApiError::NotFound("comment"))?;
    let instance = state
        .repo
        .get_instance(comment.instance_id)
        .await?
        .ok_or(ApiError::NotFound("homework instance"))?;
    let course = course_for_instance(&state.repo, &instance).await?;

    let ancestry = Ancestry::comment(&course, instance.student_id, comment.author_id);
    policy::check(
        user.principal(),
        Action::Delete,
        Resource::InstanceComment,
        Some(&ancestry),
    )
    .map_err(forbid)?;

    if state.repo.delete_comment(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("comment"))
    }
}

// --- Upload Handler ---

/// get_presigned_url
///
/// [Authenticated Route] Generates a temporary, signed URL for a direct
/// client-to-storage upload, returning the object key to submit back as a
/// lecture `file_key` or instance `uploaded_work`.
pub async fn get_presigned_url(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PresignedUrlRequest>,
) -> ApiResult<Json<PresignedUrlResponse>> {
    // Unique, structured object key ('uploads/UUID.ext'); the extension is
    // the only part taken from the client filename.
    let extension = std::path::Path::new(&payload.filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("bin");
    let unique_id = Uuid::new_v4();
    let object_key = format!("uploads/{}.{}", unique_id, extension);

    let url = state
        .storage
        .get_presigned_upload_url(&object_key, &payload.file_type)
        .await
        .map_err(|e| ApiError::Internal(format!("storage error: {e}")))?;

    Ok(Json(PresignedUrlResponse {
        upload_url: url,
        resource_key: object_key,
    }))
}
